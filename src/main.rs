fn main() {
    mail_consumer_lib::run()
}
