//! # motionwatch-smtp
//!
//! Async SMTP submission client: implicit TLS or STARTTLS, AUTH PLAIN, and a
//! type-state transaction (`MAIL FROM` → `RCPT TO` → `DATA`).
//!
//! ## Quick Start
//!
//! ```ignore
//! use motionwatch_smtp::{Address, Security, connection::connect};
//!
//! let client = connect("smtp.example.com", 465, Security::Implicit, "motionwatch").await?;
//! let client = client.auth_plain("cam@example.com", "app-password").await?;
//! let client = client
//!     .send_mail(
//!         Address::new("cam@example.com")?,
//!         &[Address::new("me@example.com")?],
//!         b"Subject: Test\r\n\r\nHello\r\n",
//!     )
//!     .await?;
//! client.quit().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use command::Command;
pub use connection::{Client, Security, SmtpStream, connect};
pub use error::{Error, Result};
pub use types::{Address, Reply, ReplyCode};
