use lettre::Address;
use regex::Regex;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

const MAX_NAME_LENGTH: usize = 50;
const MAX_MESSAGE_LENGTH: usize = 500;
const MAX_EMAIL_LENGTH: usize = 254;
const MAX_EMAIL_LOCAL_PART_LENGTH: usize = 64;

const PHONE_PLACEHOLDER: &str = "N/A";

/// A contact form submission as it arrives in the request body.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContactFormMessage {
    #[serde(default, deserialize_with = "lenient_string")]
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub phone: Option<String>,
}

/// A submission which passed every rule, with sanitized values.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedContactFormMessage {
    pub first_name: String,
    pub last_name: String,
    pub email: Address,
    pub message: String,
    pub phone: Option<String>,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

impl FieldError {
    const fn new(field: &'static str, message: &'static str) -> Self {
        Self { field, message }
    }
}

impl ContactFormMessage {
    /// Checks every field, reporting at most one error per field in field order.
    pub fn validate(&self) -> Result<ValidatedContactFormMessage, Vec<FieldError>> {
        let mut errors = Vec::new();

        let first_name = record(
            &mut errors,
            "firstName",
            required_text(
                self.first_name.as_deref(),
                MAX_NAME_LENGTH,
                "First name is required",
                "First name cannot exceed 50 characters",
            ),
        );
        let last_name = record(
            &mut errors,
            "lastName",
            required_text(
                self.last_name.as_deref(),
                MAX_NAME_LENGTH,
                "Last name is required",
                "Last name cannot exceed 50 characters",
            ),
        );
        let email = record(
            &mut errors,
            "email",
            normalize_email(self.email.as_deref().unwrap_or_default())
                .ok_or("A valid email is required"),
        );
        let message = record(
            &mut errors,
            "message",
            required_text(
                self.message.as_deref(),
                MAX_MESSAGE_LENGTH,
                "Message is required",
                "Message cannot exceed 500 characters",
            ),
        );
        let phone = record(&mut errors, "phone", optional_phone(self.phone.as_deref()));

        match (first_name, last_name, email, message, phone) {
            (Some(first_name), Some(last_name), Some(email), Some(message), Some(phone)) => {
                Ok(ValidatedContactFormMessage {
                    first_name,
                    last_name,
                    email,
                    message,
                    phone,
                })
            }
            _ => Err(errors),
        }
    }
}

impl ValidatedContactFormMessage {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn phone_or_placeholder(&self) -> &str {
        self.phone.as_deref().unwrap_or(PHONE_PLACEHOLDER)
    }
}

fn record<T>(
    errors: &mut Vec<FieldError>,
    field: &'static str,
    result: Result<T, &'static str>,
) -> Option<T> {
    result
        .map_err(|message| errors.push(FieldError::new(field, message)))
        .ok()
}

fn required_text(
    value: Option<&str>,
    max_length: usize,
    missing_message: &'static str,
    too_long_message: &'static str,
) -> Result<String, &'static str> {
    let value = value.unwrap_or_default().trim();
    if value.is_empty() {
        Err(missing_message)
    } else if value.chars().count() > max_length {
        Err(too_long_message)
    } else {
        Ok(value.into())
    }
}

fn optional_phone(value: Option<&str>) -> Result<Option<String>, &'static str> {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    let Some(value) = value else {
        return Ok(None);
    };
    // `\d` would also admit non-ASCII digits.
    if PHONE
        .get_or_init(|| Regex::new(r"^[0-9]{10}$").unwrap())
        .is_match(value)
    {
        Ok(Some(value.into()))
    } else {
        Err("Phone number must be 10 digits")
    }
}

/// Returns the canonical form of a syntactically valid address, or `None`.
///
/// The whole address is lowercased. Well-known providers additionally lose the parts of the
/// local part which they ignore when delivering, so that aliases of one mailbox compare equal.
pub fn normalize_email(value: &str) -> Option<Address> {
    if !is_email(value) {
        return None;
    }
    let lowered = value.to_lowercase();
    let (local, domain) = lowered.rsplit_once('@')?;
    let (local, domain) = match domain {
        "gmail.com" | "googlemail.com" => (strip_subaddress(local).replace('.', ""), "gmail.com"),
        "icloud.com" | "me.com" => (strip_subaddress(local).into(), domain),
        "hotmail.com" | "hotmail.co.uk" | "hotmail.de" | "hotmail.fr" | "hotmail.it"
        | "hotmail.es" | "live.com" | "live.co.uk" | "live.de" | "live.fr" | "msn.com"
        | "outlook.com" | "outlook.de" | "outlook.fr" | "outlook.it" | "outlook.es"
        | "passport.com" => (strip_subaddress(local).into(), domain),
        // Yahoo only drops the segment after the last dash.
        "yahoo.com" | "yahoo.co.uk" | "yahoo.ca" | "yahoo.de" | "yahoo.fr" | "yahoo.in"
        | "yahoo.it" | "ymail.com" | "rocketmail.com" => (
            local.rsplit_once('-').map_or(local, |(base, _)| base).into(),
            domain,
        ),
        "yandex.ru" | "yandex.ua" | "yandex.kz" | "yandex.com" | "yandex.by" | "ya.ru" => {
            (local.to_string(), "yandex.ru")
        }
        _ => (local.to_string(), domain),
    };
    if local.is_empty() {
        return None;
    }
    Address::new(local, domain).ok()
}

fn strip_subaddress(local: &str) -> &str {
    local.split('+').next().unwrap_or_default()
}

/// Syntax of the local part and the domain is left to `lettre`, which admits UTF-8 local parts
/// and internationalized domains. On top of that the domain must be a fully qualified name.
fn is_email(value: &str) -> bool {
    if value.chars().count() > MAX_EMAIL_LENGTH {
        return false;
    }
    let Some((local, domain)) = value.rsplit_once('@') else {
        return false;
    };
    local.len() <= MAX_EMAIL_LOCAL_PART_LENGTH
        && is_fully_qualified_domain(domain)
        && Address::new(local, domain).is_ok()
}

fn is_fully_qualified_domain(domain: &str) -> bool {
    static DOMAIN: OnceLock<Regex> = OnceLock::new();
    // Non-ASCII letters, leaving out surrogates and the full-width forms of ASCII.
    const INTERNATIONAL: &str = r"\x{00A1}-\x{D7FF}\x{F900}-\x{FF00}\x{FF5F}-\x{FFEF}";
    const INTERNATIONAL_TLD: &str =
        r"\x{00A1}-\x{00A8}\x{00AA}-\x{D7FF}\x{F900}-\x{FDCF}\x{FDF0}-\x{FF00}\x{FF5F}-\x{FFEF}";

    DOMAIN
        .get_or_init(|| {
            let label_char = format!("[a-z0-9{INTERNATIONAL}]");
            let inner_char = format!("[a-z0-9{INTERNATIONAL}-]");
            Regex::new(&format!(
                r"(?i)^({label_char}({inner_char}{{0,61}}{label_char})?\.)+([a-z{INTERNATIONAL_TLD}]{{2,63}}|xn--[a-z0-9-]{{2,59}})$"
            ))
            .unwrap()
        })
        .is_match(domain)
}

/// Accepts JSON strings as they are and scalars in their textual form, as a form library would.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(value) => Ok(Some(value)),
        Value::Bool(value) => Ok(Some(value.to_string())),
        Value::Number(value) => Ok(Some(value.to_string())),
        Value::Array(_) | Value::Object(_) => Err(de::Error::custom("expected a string")),
    }
}

/// Like `lenient_string`, but an explicit `null` counts as a value which was given empty.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Some(lenient_string(deserializer)?.unwrap_or_default()))
}
