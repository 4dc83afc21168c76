//! Contact relay: forwards a buyer's message to a seller over SMTP.
//!
//! Uses lettre's async SMTP transport (STARTTLS relay). One attempt per
//! message.

use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use serde::Deserialize;
use thiserror::Error;

use bookbazaar_core::Email;

use crate::config::MailConfig;

/// Subject line of every relayed message.
pub const CONTACT_SUBJECT: &str = "Interest in your BookBazaar Listing";

/// Errors that can occur when sending mail.
#[derive(Debug, Error)]
pub enum MailError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build the message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Address could not be used as a mailbox.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),
}

/// Why a contact request was rejected before sending.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContactError {
    #[error("All fields are required.")]
    MissingField,

    #[error("Invalid email address: {0}")]
    InvalidAddress(String),
}

/// Contact form body as posted by the client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactRequest {
    pub seller_email: String,
    pub buyer_name: String,
    pub buyer_email: String,
    pub message: String,
}

/// A validated buyer-to-seller message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactMessage {
    pub seller: Email,
    pub buyer_name: String,
    pub buyer: Email,
    pub body: String,
}

impl TryFrom<ContactRequest> for ContactMessage {
    type Error = ContactError;

    fn try_from(req: ContactRequest) -> Result<Self, Self::Error> {
        let fields = [
            &req.seller_email,
            &req.buyer_name,
            &req.buyer_email,
            &req.message,
        ];
        if fields.iter().any(|f| f.trim().is_empty()) {
            return Err(ContactError::MissingField);
        }

        let seller = Email::parse(&req.seller_email)
            .map_err(|_| ContactError::InvalidAddress(req.seller_email.clone()))?;
        let buyer = Email::parse(&req.buyer_email)
            .map_err(|_| ContactError::InvalidAddress(req.buyer_email.clone()))?;

        Ok(Self {
            seller,
            buyer_name: req.buyer_name.trim().to_owned(),
            buyer,
            body: req.message,
        })
    }
}

impl ContactMessage {
    /// Build the outgoing message: from the buyer, to the seller, plain text.
    ///
    /// # Errors
    ///
    /// Returns `MailError` if an address is not a valid mailbox or the
    /// message cannot be assembled.
    pub fn to_message(&self) -> Result<Message, MailError> {
        let from = Mailbox::new(
            Some(self.buyer_name.clone()),
            self.buyer
                .as_str()
                .parse()
                .map_err(|_| MailError::InvalidAddress(self.buyer.to_string()))?,
        );
        let to: Mailbox = self
            .seller
            .as_str()
            .parse()
            .map_err(|_| MailError::InvalidAddress(self.seller.to_string()))?;

        Ok(Message::builder()
            .from(from.clone())
            .reply_to(from)
            .to(to)
            .subject(CONTACT_SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(self.body.clone())?)
    }
}

/// SMTP sender for relayed messages.
#[derive(Clone)]
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl Mailer {
    /// Create a mailer from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the relay cannot be configured.
    pub fn new(config: &MailConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self { transport })
    }

    /// Send one contact message.
    ///
    /// # Errors
    ///
    /// Returns `MailError` if the message cannot be built or delivered.
    pub async fn send_contact(&self, contact: &ContactMessage) -> Result<(), MailError> {
        let message = contact.to_message()?;
        self.transport.send(message).await?;

        tracing::info!(
            to_domain = %contact.seller.domain(),
            subject = CONTACT_SUBJECT,
            "Contact message relayed"
        );
        Ok(())
    }
}
