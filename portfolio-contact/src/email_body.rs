use crate::validation::ValidatedContactFormMessage;
use serde::Serialize;
use serde_json::Value;
use tinytemplate::{error::Error, format, TinyTemplate};

pub const CONTACT_EMAIL_SUBJECT: &str = "New Contact Form Submission - Portfolio";

const CONTACT_EMAIL_TEMPLATE_NAME: &str = "contact-email";
const CONTACT_EMAIL_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/assets/contact-email.html"
));

#[derive(Serialize)]
struct Context<'a> {
    name: String,
    email: &'a str,
    phone: &'a str,
    message: &'a str,
}

/// Renders the HTML body of the mail relayed to the site owner.
///
/// Every submitted value is HTML-escaped by the template's default formatter.
pub fn render_contact_email(message: &ValidatedContactFormMessage) -> Result<String, Error> {
    let mut tt = TinyTemplate::new();
    tt.add_formatter("render_paragraphs", render_paragraphs);
    tt.add_template(CONTACT_EMAIL_TEMPLATE_NAME, CONTACT_EMAIL_TEMPLATE)?;
    let context = Context {
        name: message.display_name(),
        email: message.email.as_ref(),
        phone: message.phone_or_placeholder(),
        message: &message.message,
    };
    tt.render(CONTACT_EMAIL_TEMPLATE_NAME, &context)
}

fn render_paragraphs(value: &Value, output: &mut String) -> Result<(), Error> {
    output.push_str("<p>");
    let mut formatted = String::new();
    format(value, &mut formatted)?;
    output.push_str(&formatted.replace("\r\n", "\n").replace("\n\n", "</p><p>"));
    output.push_str("</p>");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::render_contact_email;
    use crate::validation::{ContactFormMessage, ValidatedContactFormMessage};
    use googletest::prelude::*;

    const MALICIOUS_CONTENT: &str = "<script>doEvil();</script>";

    fn validated(
        first_name: &str,
        message: &str,
        phone: Option<&str>,
    ) -> ValidatedContactFormMessage {
        ContactFormMessage {
            first_name: Some(first_name.into()),
            last_name: Some("Lee".into()),
            email: Some("ann@x.com".into()),
            message: Some(message.into()),
            phone: phone.map(Into::into),
        }
        .validate()
        .unwrap()
    }

    #[googletest::test]
    fn renders_all_submitted_fields() {
        let output = render_contact_email(&validated("Ann", "Hi there", Some("5551234567"))).unwrap();

        expect_that!(output, contains_substring("<strong>Name:</strong> Ann Lee"));
        expect_that!(output, contains_substring("<strong>Email:</strong> ann@x.com"));
        expect_that!(output, contains_substring("<strong>Phone:</strong> 5551234567"));
        expect_that!(output, contains_substring("<p>Hi there</p>"));
    }

    #[test]
    fn renders_placeholder_when_phone_is_absent() -> Result<()> {
        let output = render_contact_email(&validated("Ann", "Hi there", None)).unwrap();

        verify_that!(output, contains_substring("<strong>Phone:</strong> N/A"))
    }

    #[test]
    fn escapes_user_input_in_name() -> Result<()> {
        let output = render_contact_email(&validated(MALICIOUS_CONTENT, "A message", None)).unwrap();

        verify_that!(output, not(contains_substring(MALICIOUS_CONTENT)))
    }

    #[googletest::test]
    fn escapes_user_input_in_message() {
        let output = render_contact_email(&validated("Ann", MALICIOUS_CONTENT, None)).unwrap();

        expect_that!(output, not(contains_substring(MALICIOUS_CONTENT)));
        expect_that!(output, contains_substring("&lt;script&gt;"));
    }

    #[test]
    fn renders_paragraphs_in_message() -> Result<()> {
        let output =
            render_contact_email(&validated("Ann", "A paragraph\n\nAnother paragraph", None))
                .unwrap();

        verify_that!(
            output,
            contains_substring("<p>A paragraph</p><p>Another paragraph</p>")
        )
    }
}
