mod config;
mod email_body;
mod mail_relay;
mod validation;

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use config::Config;
use email_body::{render_contact_email, CONTACT_EMAIL_SUBJECT};
use lettre::message::Mailbox;
use mail_relay::{MailRelay, OutgoingMail, SmtpMailRelay};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::timeout};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use validation::{ContactFormMessage, FieldError, ValidatedContactFormMessage};

const CONTACT_PATH: &str = "/contact";
const BODY_LIMIT_BYTES: usize = 100 * 1024;

const SEND_FAILURE_MESSAGE: &str = "Failed to send the message. Please try again later.";
const MALFORMED_BODY_ERROR: FieldError = FieldError {
    field: "body",
    message: "Request body must be a JSON object",
};
const OVERSIZED_BODY_ERROR: FieldError = FieldError {
    field: "body",
    message: "Request body is too large",
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    if let Err(error) = dotenvy::dotenv() {
        if !error.not_found() {
            return Err(error.into());
        }
    }
    let config = Config::from_env()?;

    let mail_relay = SmtpMailRelay::new(&config)?;
    match mail_relay.verify().await {
        Ok(()) => info!("Mail relay is ready to send messages"),
        Err(error) if config.require_mail_ready => {
            error!("Error setting up mail relay: {error}");
            return Err(error.into());
        }
        Err(error) => error!("Error setting up mail relay: {error}"),
    }

    let handler = Arc::new(ContactFormHandler::new(mail_relay, config.send_timeout));
    let listener = TcpListener::bind(config.socket_address()).await?;
    info!("Server running on {}", listener.local_addr()?);
    axum::serve(listener, router(handler))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for Ctrl-C: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                error!("Unable to listen for SIGTERM: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutting down");
}

fn router<MailRelayT: MailRelay + 'static>(
    handler: Arc<ContactFormHandler<MailRelayT>>,
) -> Router {
    Router::new()
        .route(CONTACT_PATH, post(submit_contact_form::<MailRelayT>))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(handler)
}

async fn submit_contact_form<MailRelayT: MailRelay + 'static>(
    State(handler): State<Arc<ContactFormHandler<MailRelayT>>>,
    payload: Result<Json<ContactFormMessage>, JsonRejection>,
) -> Response {
    handler.handle(payload).await
}

struct ContactFormHandler<MailRelayT: MailRelay> {
    mail_relay: MailRelayT,
    send_timeout: Duration,
}

impl<MailRelayT: MailRelay> ContactFormHandler<MailRelayT> {
    fn new(mail_relay: MailRelayT, send_timeout: Duration) -> Self {
        Self {
            mail_relay,
            send_timeout,
        }
    }

    async fn handle(&self, payload: Result<Json<ContactFormMessage>, JsonRejection>) -> Response {
        let message = match payload {
            Ok(Json(message)) => message,
            Err(rejection) => {
                let error = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    ContactFormError::OversizedRequest(rejection.body_text())
                } else {
                    ContactFormError::MalformedRequest(rejection.body_text())
                };
                error.log();
                return error.into_response();
            }
        };
        match self.process_message(message).await {
            Ok(()) => (StatusCode::OK, Json(SendStatus::sent())).into_response(),
            Err(error) => {
                error.log();
                error.into_response()
            }
        }
    }

    async fn process_message(&self, message: ContactFormMessage) -> Result<(), ContactFormError> {
        let validated_message = message
            .validate()
            .map_err(ContactFormError::InvalidSubmission)?;
        let mail = Self::construct_mail(&validated_message)?;
        self.send_mail(mail, &validated_message).await
    }

    fn construct_mail(
        message: &ValidatedContactFormMessage,
    ) -> Result<OutgoingMail, ContactFormError> {
        let html_body = render_contact_email(message).map_err(|error| {
            ContactFormError::InternalError(format!("Error rendering message: {error}"))
        })?;
        Ok(OutgoingMail {
            reply_to: Mailbox::new(Some(message.display_name()), message.email.clone()),
            subject: CONTACT_EMAIL_SUBJECT.into(),
            html_body,
        })
    }

    async fn send_mail(
        &self,
        mail: OutgoingMail,
        validated_message: &ValidatedContactFormMessage,
    ) -> Result<(), ContactFormError> {
        match timeout(self.send_timeout, self.mail_relay.send(mail)).await {
            Ok(Ok(())) => {
                info!("Sent contact form message from {}", validated_message.email);
                Ok(())
            }
            Ok(Err(error)) => Err(ContactFormError::InternalError(format!(
                "Error sending message: {error}"
            ))),
            Err(_) => Err(ContactFormError::InternalError(format!(
                "Sending message timed out after {:?}",
                self.send_timeout
            ))),
        }
    }
}

#[derive(Serialize)]
struct SendStatus {
    code: u16,
    status: &'static str,
}

impl SendStatus {
    fn sent() -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            status: "Message Sent Successfully",
        }
    }
}

#[derive(Serialize)]
struct ValidationErrors {
    errors: Vec<FieldError>,
}

#[derive(Serialize)]
struct SendError {
    error: &'static str,
}

#[derive(Debug, thiserror::Error)]
enum ContactFormError {
    #[error("Invalid submission: {0:?}")]
    InvalidSubmission(Vec<FieldError>),
    #[error("Malformed request: {0}")]
    MalformedRequest(String),
    #[error("Request too large: {0}")]
    OversizedRequest(String),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ContactFormError {
    fn log(&self) {
        match self {
            ContactFormError::InvalidSubmission(errors) => {
                info!("Rejected contact form submission: {errors:?}");
            }
            ContactFormError::MalformedRequest(description) => {
                info!("Rejected malformed contact form request: {description}");
            }
            ContactFormError::OversizedRequest(description) => {
                info!("Rejected oversized contact form request: {description}");
            }
            ContactFormError::InternalError(description) => {
                error!("Internal error sending contact form email: {description}");
            }
        }
    }
}

impl IntoResponse for ContactFormError {
    fn into_response(self) -> Response {
        match self {
            ContactFormError::InvalidSubmission(errors) => {
                (StatusCode::BAD_REQUEST, Json(ValidationErrors { errors })).into_response()
            }
            ContactFormError::MalformedRequest(_) => (
                StatusCode::BAD_REQUEST,
                Json(ValidationErrors {
                    errors: vec![MALFORMED_BODY_ERROR],
                }),
            )
                .into_response(),
            ContactFormError::OversizedRequest(_) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(ValidationErrors {
                    errors: vec![OVERSIZED_BODY_ERROR],
                }),
            )
                .into_response(),
            ContactFormError::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SendError {
                    error: SEND_FAILURE_MESSAGE,
                }),
            )
                .into_response(),
        }
    }
}
