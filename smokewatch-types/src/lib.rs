//! # smokewatch-types
//!
//! Core types shared by every part of smokewatch: the [`Reading`] a sensor
//! produces, the [`AlertEvent`] a channel raises, and the plain-text wire
//! format readings travel in on the message queue.
//!
//! ## Wire format
//!
//! A message body is UTF-8 text of the form `"<timestamp>, <temperature>"`,
//! with the temperature rounded to two decimal places. There is no envelope.
//!
//! ```rust
//! use smokewatch_types::Reading;
//!
//! let reading = Reading::parse(b"12:00:00, 225.5").unwrap();
//! assert_eq!(reading.timestamp(), "12:00:00");
//! assert_eq!(reading.temperature(), 225.5);
//!
//! assert_eq!(Reading::new("12:00:30", 224.987).unwrap().to_payload(), b"12:00:30, 224.99");
//! ```
//!
//! ## Features
//!
//! - `serde`: `Serialize`/`Deserialize` for [`Reading`] and [`AlertEvent`]

mod alert;
mod reading;
mod round;
mod wire;

pub use alert::*;
pub use reading::*;
pub use round::*;
pub use wire::*;
