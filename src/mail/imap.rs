//! IMAP Client Implementation
//!
//! Blocking IMAP session over plain TCP, STARTTLS or implicit TLS, built on
//! the `imap` crate. The protocol state is tracked explicitly so the
//! AUTH=PLAIN fallback's forced folder selection is a visible transition.

use crate::mail::{
    client::{plain_auth_payload, MailboxClient, SessionState},
    config::{MailAccount, SecurityType},
    uid_set, MailError, MailMessage, MailResult, MessageFlag, SearchQuery, Uid,
};
use imap::{Client, Session};
use native_tls::TlsConnector;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

const IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetch the full message without implicitly setting \Seen
const FETCH_QUERY: &str = "(UID BODY.PEEK[])";

/// SASL PLAIN authenticator for rust-imap
struct PlainAuth {
    payload: Vec<u8>,
}

impl imap::Authenticator for PlainAuth {
    type Response = Vec<u8>;

    fn process(&self, _challenge: &[u8]) -> Self::Response {
        // rust-imap base64-encodes the response
        self.payload.clone()
    }
}

enum Connection<T: Read + Write> {
    Connected(Client<T>),
    Authenticated(Session<T>),
    Selected(Session<T>, String),
    Closed,
}

impl<T: Read + Write> Connection<T> {
    fn state(&self) -> SessionState {
        match self {
            Connection::Connected(_) => SessionState::Connected,
            Connection::Authenticated(_) => SessionState::Authenticated,
            Connection::Selected(_, folder) => SessionState::Selected(folder.clone()),
            Connection::Closed => SessionState::Closed,
        }
    }
}

/// IMAP mailbox session over any blocking stream
pub struct ImapMailbox<T: Read + Write> {
    host: String,
    conn: Connection<T>,
}

/// Open a connection using the account's transport security and read the
/// server greeting.
pub fn connect(account: &MailAccount) -> MailResult<Box<dyn MailboxClient>> {
    let host = account.imap_server.as_str();
    let stream = open_tcp(host, account.imap_port)?;

    match account.imap_security {
        SecurityType::NONE => {
            let mut client = Client::new(stream);
            client.read_greeting()?;
            Ok(Box::new(ImapMailbox::new(host, client)))
        }
        SecurityType::STARTTLS => {
            let mut client = Client::new(stream);
            client.read_greeting()?;
            let client = client.secure(host, &tls_connector()?)?;
            Ok(Box::new(ImapMailbox::new(host, client)))
        }
        SecurityType::SSL => {
            let tls_stream = tls_connector()?
                .connect(host, stream)
                .map_err(|e| MailError::Connection(e.to_string()))?;
            let mut client = Client::new(tls_stream);
            client.read_greeting()?;
            Ok(Box::new(ImapMailbox::new(host, client)))
        }
    }
}

fn open_tcp(host: &str, port: u16) -> MailResult<TcpStream> {
    let stream = TcpStream::connect((host, port))
        .map_err(|e| MailError::Connection(format!("{}:{}: {}", host, port, e)))?;
    stream.set_read_timeout(Some(IO_TIMEOUT)).ok();
    stream.set_write_timeout(Some(IO_TIMEOUT)).ok();
    Ok(stream)
}

fn tls_connector() -> MailResult<TlsConnector> {
    TlsConnector::builder()
        .danger_accept_invalid_certs(false)
        .build()
        .map_err(|e| MailError::Connection(e.to_string()))
}

impl<T: Read + Write> ImapMailbox<T> {
    /// Wrap a client whose greeting has been read
    pub fn new(host: impl Into<String>, client: Client<T>) -> Self {
        Self {
            host: host.into(),
            conn: Connection::Connected(client),
        }
    }

    fn invalid_state(&self, expected: &'static str) -> MailError {
        MailError::InvalidState {
            expected,
            actual: self.conn.state(),
        }
    }

    fn client_login<F>(&mut self, login: F) -> MailResult<()>
    where
        F: FnOnce(Client<T>) -> Result<Session<T>, (imap::Error, Client<T>)>,
    {
        match std::mem::replace(&mut self.conn, Connection::Closed) {
            Connection::Connected(client) => match login(client) {
                Ok(session) => {
                    self.conn = Connection::Authenticated(session);
                    Ok(())
                }
                Err((e, client)) => {
                    self.conn = Connection::Connected(client);
                    Err(MailError::Authentication(e.to_string()))
                }
            },
            other => {
                self.conn = other;
                Err(self.invalid_state("connected"))
            }
        }
    }

    fn session(&mut self) -> MailResult<&mut Session<T>> {
        match self.conn {
            Connection::Authenticated(ref mut session) => Ok(session),
            Connection::Selected(ref mut session, _) => Ok(session),
            _ => Err(self.invalid_state("authenticated")),
        }
    }

    fn selected(&mut self) -> MailResult<&mut Session<T>> {
        match self.conn {
            Connection::Selected(ref mut session, _) => Ok(session),
            _ => Err(self.invalid_state("selected")),
        }
    }
}

impl<T: Read + Write> MailboxClient for ImapMailbox<T> {
    fn host(&self) -> &str {
        &self.host
    }

    fn state(&self) -> SessionState {
        self.conn.state()
    }

    fn login(&mut self, username: &str, password: &str) -> MailResult<()> {
        if !matches!(self.conn, Connection::Connected(_)) {
            return Err(self.invalid_state("connected"));
        }
        // LOGIN arguments are quoted strings, which are 7-bit only
        if !username.is_ascii() || !password.is_ascii() {
            return Err(MailError::CredentialEncoding(
                "username or password contains non-ASCII characters".to_string(),
            ));
        }
        self.client_login(|client| client.login(username, password))
    }

    fn authenticate_plain(&mut self, username: &str, password: &str) -> MailResult<()> {
        let auth = PlainAuth {
            payload: plain_auth_payload(username, password),
        };
        self.client_login(|client| client.authenticate("PLAIN", &auth))
    }

    fn select_folder(&mut self, folder: &str) -> MailResult<()> {
        match std::mem::replace(&mut self.conn, Connection::Closed) {
            Connection::Authenticated(mut session) | Connection::Selected(mut session, _) => {
                match session.select(folder) {
                    Ok(mailbox) => {
                        log::debug!("Selected {} ({} messages)", folder, mailbox.exists);
                        self.conn = Connection::Selected(session, folder.to_string());
                        Ok(())
                    }
                    Err(e) => {
                        // A failed SELECT leaves no mailbox selected
                        self.conn = Connection::Authenticated(session);
                        Err(MailError::FolderSelect {
                            folder: folder.to_string(),
                            message: e.to_string(),
                        })
                    }
                }
            }
            other => {
                self.conn = other;
                Err(self.invalid_state("authenticated"))
            }
        }
    }

    fn list_folders(&mut self) -> MailResult<Vec<String>> {
        let names = self.session()?.list(Some(""), Some("*"))?;
        Ok(names.iter().map(|name| name.name().to_string()).collect())
    }

    fn fetch(&mut self, query: &SearchQuery, charset: &str) -> MailResult<Vec<MailMessage>> {
        let session = self.selected()?;

        let criteria = query.to_imap();
        let search = if charset.is_empty() {
            criteria
        } else {
            format!("CHARSET {} {}", charset, criteria)
        };

        let mut uids: Vec<Uid> = session.uid_search(&search)?.into_iter().collect();
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        uids.sort_unstable();

        let fetches = session.uid_fetch(uid_set(&uids), FETCH_QUERY)?;

        let mut messages = Vec::with_capacity(fetches.len());
        for fetch in fetches.iter() {
            let (Some(uid), Some(body)) = (fetch.uid, fetch.body()) else {
                log::warn!("Skipping FETCH response without UID or body");
                continue;
            };
            match MailMessage::parse(uid, body) {
                Some(message) => messages.push(message),
                None => log::warn!("Unable to parse mail {}", uid),
            }
        }
        messages.sort_by_key(|m| m.uid);

        Ok(messages)
    }

    fn add_flags(&mut self, uids: &[Uid], flags: &[MessageFlag]) -> MailResult<()> {
        if uids.is_empty() || flags.is_empty() {
            return Ok(());
        }
        let flag_list = flags
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        self.selected()?
            .uid_store(uid_set(uids), format!("+FLAGS.SILENT ({})", flag_list))?;
        Ok(())
    }

    fn move_messages(&mut self, uids: &[Uid], folder: &str) -> MailResult<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let session = self.selected()?;
        let set = uid_set(uids);

        let supports_move = session.capabilities()?.has_str("MOVE");
        if supports_move {
            session.uid_mv(&set, folder)?;
        } else {
            session.uid_copy(&set, folder)?;
            session.uid_store(&set, "+FLAGS.SILENT (\\Deleted)")?;
            session.expunge()?;
        }
        Ok(())
    }

    fn delete_messages(&mut self, uids: &[Uid]) -> MailResult<()> {
        if uids.is_empty() {
            return Ok(());
        }
        let session = self.selected()?;
        session.uid_store(uid_set(uids), "+FLAGS.SILENT (\\Deleted)")?;
        session.expunge()?;
        Ok(())
    }

    fn raw_command(&mut self, command: &str) -> MailResult<()> {
        self.session()?.run_command_and_check_ok(command)?;
        Ok(())
    }

    fn logout(&mut self) -> MailResult<()> {
        match std::mem::replace(&mut self.conn, Connection::Closed) {
            Connection::Authenticated(mut session) | Connection::Selected(mut session, _) => {
                session.logout()?;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl<T: Read + Write> Drop for ImapMailbox<T> {
    fn drop(&mut self) {
        if let Err(e) = self.logout() {
            log::debug!("Logout from {} failed: {}", self.host, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use imap::Authenticator;

    #[test]
    fn test_plain_authenticator_ignores_challenge() {
        let auth = PlainAuth {
            payload: plain_auth_payload("user", "pässword"),
        };
        assert_eq!(auth.process(b""), b"\0user\0p\xc3\xa4ssword".to_vec());
        assert_eq!(auth.process(b"anything"), auth.payload);
    }
}
