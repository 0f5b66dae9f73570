//! E-mail notification of detected changes
mod dispatcher;
mod mailer;
mod message;

pub use dispatcher::{ChangeEvent, DeliveryOutcome, Dispatcher};
pub use mailer::{Mailer, OutgoingMail, SmtpMailer};
pub use message::{change_mail, test_mail};

#[cfg(test)]
pub(crate) use dispatcher::testing;
