use lettre::{address::AddressError, message::Mailbox, Address};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

const SENDER_DISPLAY_NAME: &str = "Portfolio Contact Form";

const DEFAULT_SMTP_URL: &str = "smtps://smtp.gmail.com";
const DEFAULT_BIND_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_SEND_TIMEOUT_SECS: u64 = 30;

/// Process configuration, read once at startup and immutable afterwards.
#[derive(Clone, Debug)]
pub struct Config {
    pub smtp_url: String,
    pub smtp_username: String,
    pub smtp_password: Option<String>,
    pub sender: Mailbox,
    pub recipient: Mailbox,
    pub bind_address: IpAddr,
    pub port: u16,
    pub send_timeout: Duration,
    pub require_mail_ready: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(
        raw_lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let lookup = |key: &str| raw_lookup(key).filter(|value| !value.trim().is_empty());

        let smtp_username = lookup("USER_MAIL").ok_or(ConfigError::MissingVariable("USER_MAIL"))?;
        let sender_address = parse_address("USER_MAIL", &smtp_username)?;
        let recipient_address = match lookup("CONTACT_RECIPIENT") {
            Some(recipient) => parse_address("CONTACT_RECIPIENT", &recipient)?,
            None => sender_address.clone(),
        };
        let send_timeout_secs = parse_or(
            "SEND_TIMEOUT_SECS",
            lookup("SEND_TIMEOUT_SECS"),
            DEFAULT_SEND_TIMEOUT_SECS,
        )?;
        if send_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                variable: "SEND_TIMEOUT_SECS",
                value: lookup("SEND_TIMEOUT_SECS").unwrap_or_default(),
            });
        }

        Ok(Self {
            smtp_url: lookup("SMTP_URL").unwrap_or_else(|| DEFAULT_SMTP_URL.into()),
            smtp_password: lookup("USER_PASS"),
            sender: Mailbox::new(Some(SENDER_DISPLAY_NAME.into()), sender_address),
            recipient: Mailbox::new(None, recipient_address),
            bind_address: parse_or("BIND_ADDRESS", lookup("BIND_ADDRESS"), DEFAULT_BIND_ADDRESS)?,
            port: parse_or("PORT", lookup("PORT"), DEFAULT_PORT)?,
            send_timeout: Duration::from_secs(send_timeout_secs),
            require_mail_ready: parse_or("REQUIRE_MAIL_READY", lookup("REQUIRE_MAIL_READY"), false)?,
            smtp_username,
        })
    }

    pub fn socket_address(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Whether the SMTP connection is encrypted, either implicitly or through mandatory STARTTLS.
    pub fn smtp_uses_tls(&self) -> bool {
        self.smtp_url.starts_with("smtps://") || self.smtp_url.contains("tls=required")
    }
}

fn parse_address(variable: &'static str, value: &str) -> Result<Address, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|source| ConfigError::InvalidAddress { variable, source })
}

fn parse_or<T: std::str::FromStr>(
    variable: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { variable, value }),
        None => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable {0}")]
    MissingVariable(&'static str),
    #[error("Environment variable {variable} is not a valid email address: {source}")]
    InvalidAddress {
        variable: &'static str,
        source: AddressError,
    },
    #[error("Environment variable {variable} has invalid value {value:?}")]
    InvalidValue {
        variable: &'static str,
        value: String,
    },
}
