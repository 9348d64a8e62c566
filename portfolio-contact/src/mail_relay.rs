use crate::config::Config;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::{Credentials, Mechanism},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{info, warn};

/// A message ready to be relayed to the site owner.
#[derive(Clone, Debug, PartialEq)]
pub struct OutgoingMail {
    pub reply_to: Mailbox,
    pub subject: String,
    pub html_body: String,
}

/// Delivers contact form messages to their fixed destination.
#[async_trait]
pub trait MailRelay: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailRelayError>;
}

pub struct SmtpMailRelay {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    recipient: Mailbox,
}

impl SmtpMailRelay {
    pub fn new(config: &Config) -> Result<Self, MailRelayError> {
        info!("Configuring mail relay for {}", config.smtp_url);
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::from_url(&config.smtp_url)?
            .authentication(vec![Mechanism::Plain])
            .timeout(Some(config.send_timeout));

        // Credentials are only ever sent over an encrypted connection. A server which requires
        // them will then reject the plain-text connection, which surfaces at verification.
        if config.smtp_uses_tls() {
            match &config.smtp_password {
                Some(password) => {
                    builder = builder.credentials(Credentials::new(
                        config.smtp_username.clone(),
                        password.clone(),
                    ));
                }
                None => {
                    warn!("USER_PASS is not set; connecting to the mail server without credentials")
                }
            }
        } else if config.smtp_password.is_some() {
            warn!(
                "Not sending credentials over unencrypted connection to {}",
                config.smtp_url
            );
        }

        Ok(Self {
            transport: builder.build(),
            sender: config.sender.clone(),
            recipient: config.recipient.clone(),
        })
    }

    /// Connects and authenticates once, without sending anything.
    pub async fn verify(&self) -> Result<(), MailRelayError> {
        if self.transport.test_connection().await? {
            Ok(())
        } else {
            Err(MailRelayError::Unreachable)
        }
    }

    fn build_message(&self, mail: OutgoingMail) -> Result<Message, MailRelayError> {
        Ok(Message::builder()
            .from(self.sender.clone())
            .reply_to(mail.reply_to)
            .to(self.recipient.clone())
            .subject(mail.subject)
            .header(ContentType::TEXT_HTML)
            .body(mail.html_body)?)
    }
}

#[async_trait]
impl MailRelay for SmtpMailRelay {
    async fn send(&self, mail: OutgoingMail) -> Result<(), MailRelayError> {
        let message = self.build_message(mail)?;
        self.transport.send(message).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MailRelayError {
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("Error building message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("Mail server did not respond")]
    Unreachable,
}

#[cfg(test)]
pub mod test_support {
    use super::{MailRelay, MailRelayError, OutgoingMail};
    use async_trait::async_trait;
    use std::{sync::Mutex, time::Duration};

    enum Behaviour {
        Deliver,
        Fail,
        Hang,
    }

    /// Records every mail instead of sending it.
    pub struct FakeMailRelay {
        behaviour: Behaviour,
        sent: Mutex<Vec<OutgoingMail>>,
    }

    impl FakeMailRelay {
        pub fn new() -> Self {
            Self::with_behaviour(Behaviour::Deliver)
        }

        pub fn failing() -> Self {
            Self::with_behaviour(Behaviour::Fail)
        }

        pub fn hanging() -> Self {
            Self::with_behaviour(Behaviour::Hang)
        }

        fn with_behaviour(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                sent: Default::default(),
            }
        }

        /// Every mail passed to `send`, including attempts which failed.
        pub fn sent_mails(&self) -> Vec<OutgoingMail> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MailRelay for FakeMailRelay {
        async fn send(&self, mail: OutgoingMail) -> Result<(), MailRelayError> {
            self.sent.lock().unwrap().push(mail);
            match self.behaviour {
                Behaviour::Deliver => Ok(()),
                Behaviour::Fail => Err(MailRelayError::Unreachable),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        }
    }
}
