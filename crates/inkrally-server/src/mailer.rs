/// Outbound verification-code delivery, reduced to a boolean side effect.
///
/// Real SMTP delivery is an external collaborator; the server only cares
/// whether the send happened, because a failed send must leave no
/// verification code behind.
pub trait MailSender: Send + Sync {
    fn send_verification_code(&self, email: &str, code: &str) -> bool;
}

/// Development mailer: logs the code instead of delivering it.
pub struct LogMailer;

impl MailSender for LogMailer {
    fn send_verification_code(&self, email: &str, code: &str) -> bool {
        tracing::info!(email = %email, code = %code, "verification code issued (log-only mailer)");
        true
    }
}
