//! Mailbox session abstraction
//!
//! The processors only talk to a [`MailboxClient`]. The real implementation is
//! [`ImapMailbox`](super::ImapMailbox); tests drive the processors with an
//! in-memory fake.

use super::{MailAccount, MailError, MailMessage, MailResult, MessageFlag, SearchQuery, Uid};
use std::fmt;

/// Folder opened after an out-of-band AUTH=PLAIN login
pub const INBOX: &str = "INBOX";

/// Protocol state of a mailbox session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Greeting read, not logged in
    Connected,
    Authenticated,
    Selected(String),
    /// Logged out or the underlying connection was lost
    Closed,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated | SessionState::Selected(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connected => f.write_str("connected"),
            SessionState::Authenticated => f.write_str("authenticated"),
            SessionState::Selected(folder) => write!(f, "selected({})", folder),
            SessionState::Closed => f.write_str("closed"),
        }
    }
}

/// Primitives the rule engine needs from an IMAP session
pub trait MailboxClient {
    /// Host this session is connected to
    fn host(&self) -> &str;

    fn state(&self) -> SessionState;

    /// Standard LOGIN. Fails with [`MailError::CredentialEncoding`] when the
    /// credentials cannot be sent as LOGIN arguments.
    fn login(&mut self, username: &str, password: &str) -> MailResult<()>;

    /// SASL PLAIN (RFC 4616): `\0username\0password`, UTF-8.
    fn authenticate_plain(&mut self, username: &str, password: &str) -> MailResult<()>;

    fn select_folder(&mut self, folder: &str) -> MailResult<()>;

    fn list_folders(&mut self) -> MailResult<Vec<String>>;

    /// Search the selected folder and fetch every match without setting \Seen.
    fn fetch(&mut self, query: &SearchQuery, charset: &str) -> MailResult<Vec<MailMessage>>;

    fn add_flags(&mut self, uids: &[Uid], flags: &[MessageFlag]) -> MailResult<()>;

    fn move_messages(&mut self, uids: &[Uid], folder: &str) -> MailResult<()>;

    fn delete_messages(&mut self, uids: &[Uid]) -> MailResult<()>;

    /// Send a raw command and require a tagged OK
    fn raw_command(&mut self, command: &str) -> MailResult<()>;

    fn logout(&mut self) -> MailResult<()>;
}

/// Opens mailbox sessions for accounts
pub trait MailboxConnector: Send + Sync {
    fn connect(&self, account: &MailAccount) -> MailResult<Box<dyn MailboxClient>>;
}

/// Connector that opens real IMAP connections
#[derive(Debug, Default, Clone, Copy)]
pub struct ImapConnector;

impl MailboxConnector for ImapConnector {
    fn connect(&self, account: &MailAccount) -> MailResult<Box<dyn MailboxClient>> {
        super::imap::connect(account)
    }
}

/// Log in, falling back to AUTH=PLAIN only when LOGIN cannot encode the
/// credentials. The fallback bypasses the normal LOGIN transition, so the
/// inbox is selected explicitly afterwards to leave the session in the
/// selected state.
pub fn authenticate(
    mailbox: &mut dyn MailboxClient,
    username: &str,
    password: &str,
) -> MailResult<()> {
    match mailbox.login(username, password) {
        Ok(()) => Ok(()),
        Err(MailError::CredentialEncoding(reason)) => {
            log::debug!("Falling back to AUTH=PLAIN ({})", reason);
            mailbox.authenticate_plain(username, password)?;
            mailbox.select_folder(INBOX)?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Build the SASL PLAIN initial response with an empty authorization identity
pub fn plain_auth_payload(username: &str, password: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(username.len() + password.len() + 2);
    payload.push(0);
    payload.extend_from_slice(username.as_bytes());
    payload.push(0);
    payload.extend_from_slice(password.as_bytes());
    payload
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable in-memory mailbox used by the processor tests.

    use super::*;
    use std::collections::HashSet;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Login,
        AuthenticatePlain(Vec<u8>),
        Select(String),
        List,
        Fetch(String),
        AddFlags(Vec<Uid>, Vec<MessageFlag>),
        Move(Vec<Uid>, String),
        Delete(Vec<Uid>),
        Raw(String),
        Logout,
    }

    pub struct FakeMailbox {
        pub host: String,
        pub state: SessionState,
        pub folders: Vec<String>,
        pub messages: Vec<MailMessage>,
        pub seen: HashSet<Uid>,
        pub calls: Vec<Call>,
        pub login_error: Option<fn() -> MailError>,
        pub fail_fetch: bool,
        pub fail_list: bool,
        pub fail_post_consume: bool,
    }

    impl FakeMailbox {
        pub fn new(host: &str) -> Self {
            Self {
                host: host.to_string(),
                state: SessionState::Connected,
                folders: vec![INBOX.to_string()],
                messages: Vec::new(),
                seen: HashSet::new(),
                calls: Vec::new(),
                login_error: None,
                fail_fetch: false,
                fail_list: false,
                fail_post_consume: false,
            }
        }

        fn require_selected(&self) -> MailResult<()> {
            match self.state {
                SessionState::Selected(_) => Ok(()),
                ref other => Err(MailError::InvalidState {
                    expected: "selected",
                    actual: other.clone(),
                }),
            }
        }

        fn post_consume(&mut self, call: Call) -> MailResult<()> {
            self.require_selected()?;
            self.calls.push(call);
            if self.fail_post_consume {
                return Err(MailError::Imap("NO [CANNOT] store refused".into()));
            }
            Ok(())
        }
    }

    impl MailboxClient for FakeMailbox {
        fn host(&self) -> &str {
            &self.host
        }

        fn state(&self) -> SessionState {
            self.state.clone()
        }

        fn login(&mut self, _username: &str, _password: &str) -> MailResult<()> {
            self.calls.push(Call::Login);
            if let Some(err) = self.login_error {
                return Err(err());
            }
            self.state = SessionState::Authenticated;
            Ok(())
        }

        fn authenticate_plain(&mut self, username: &str, password: &str) -> MailResult<()> {
            self.calls
                .push(Call::AuthenticatePlain(plain_auth_payload(username, password)));
            self.state = SessionState::Authenticated;
            Ok(())
        }

        fn select_folder(&mut self, folder: &str) -> MailResult<()> {
            self.calls.push(Call::Select(folder.to_string()));
            if !self.state.is_authenticated() {
                return Err(MailError::InvalidState {
                    expected: "authenticated",
                    actual: self.state.clone(),
                });
            }
            if !self.folders.iter().any(|f| f == folder) {
                return Err(MailError::FolderSelect {
                    folder: folder.to_string(),
                    message: "NO Mailbox doesn't exist".into(),
                });
            }
            self.state = SessionState::Selected(folder.to_string());
            Ok(())
        }

        fn list_folders(&mut self) -> MailResult<Vec<String>> {
            self.calls.push(Call::List);
            if self.fail_list {
                return Err(MailError::Imap("BAD LIST".into()));
            }
            Ok(self.folders.clone())
        }

        fn fetch(&mut self, query: &SearchQuery, _charset: &str) -> MailResult<Vec<MailMessage>> {
            self.require_selected()?;
            self.calls.push(Call::Fetch(query.to_imap()));
            if self.fail_fetch {
                return Err(MailError::Imap("BAD SEARCH".into()));
            }
            let unseen_only = query.to_imap().split(' ').any(|k| k == "UNSEEN");
            Ok(self
                .messages
                .iter()
                .filter(|m| !unseen_only || !self.seen.contains(&m.uid))
                .cloned()
                .collect())
        }

        fn add_flags(&mut self, uids: &[Uid], flags: &[MessageFlag]) -> MailResult<()> {
            self.post_consume(Call::AddFlags(uids.to_vec(), flags.to_vec()))?;
            if flags.contains(&MessageFlag::Seen) {
                self.seen.extend(uids.iter().copied());
            }
            Ok(())
        }

        fn move_messages(&mut self, uids: &[Uid], folder: &str) -> MailResult<()> {
            self.post_consume(Call::Move(uids.to_vec(), folder.to_string()))
        }

        fn delete_messages(&mut self, uids: &[Uid]) -> MailResult<()> {
            self.post_consume(Call::Delete(uids.to_vec()))
        }

        fn raw_command(&mut self, command: &str) -> MailResult<()> {
            self.post_consume(Call::Raw(command.to_string()))
        }

        fn logout(&mut self) -> MailResult<()> {
            self.calls.push(Call::Logout);
            self.state = SessionState::Closed;
            Ok(())
        }
    }
}
