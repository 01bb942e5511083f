//! Frame codec: text frames to typed [`Message`] values.
//!
//! Every frame is a JSON object whose `type` field selects the payload
//! shape. [`decode`] never panics: unknown or missing tags become
//! [`DecodeError::UnrecognizedType`], structural problems become
//! [`DecodeError::Malformed`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the discriminator field in every frame.
pub const TYPE_FIELD: &str = "type";

/// All discriminator values [`decode`] accepts.
pub const KNOWN_TYPES: [&str; 5] = [
    "location",
    "status",
    "booking_opened",
    "booking_closed",
    "stops_changed",
];

/// A WGS-84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees, `-90..=90`.
    pub lat: f64,
    /// Longitude in degrees, `-180..=180`. Accepts `lng` on input.
    #[serde(alias = "lng")]
    pub lon: f64,
}

impl Coordinate {
    /// Returns `true` if both components are within their valid ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Position report for the tracked vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees. Accepts `lng` on input.
    #[serde(alias = "lng")]
    pub lon: f64,
    /// When the position was sampled, if the server reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
}

impl Location {
    /// Returns the position as a [`Coordinate`].
    #[must_use]
    pub const fn coordinate(&self) -> Coordinate {
        Coordinate {
            lat: self.lat,
            lon: self.lon,
        }
    }
}

/// Ride status change (e.g. `"waiting_for_pickup"`, `"in_progress"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Server-defined status string.
    pub status: String,
}

/// Replacement list of intermediate stops on the current route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopsChanged {
    /// Stops in route order.
    pub stops: Vec<Coordinate>,
}

/// Decoded feed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Vehicle position update.
    Location(Location),
    /// Ride status update.
    Status(StatusUpdate),
    /// A booking was opened; the ride is live.
    BookingOpened,
    /// The booking was closed; no further updates are expected.
    BookingClosed,
    /// The intermediate stops changed.
    StopsChanged(StopsChanged),
}

impl Message {
    /// Returns the discriminator value for this message.
    #[must_use]
    pub const fn type_str(&self) -> &'static str {
        match self {
            Self::Location(_) => "location",
            Self::Status(_) => "status",
            Self::BookingOpened => "booking_opened",
            Self::BookingClosed => "booking_closed",
            Self::StopsChanged(_) => "stops_changed",
        }
    }

    /// Checks payload values that the JSON shape alone cannot express.
    fn validate(&self) -> Result<(), DecodeError> {
        let out_of_range = match self {
            Self::Location(loc) => !loc.coordinate().is_valid(),
            Self::StopsChanged(change) => change.stops.iter().any(|c| !c.is_valid()),
            Self::Status(_) | Self::BookingOpened | Self::BookingClosed => false,
        };
        if out_of_range {
            return Err(DecodeError::Malformed {
                reason: "coordinate out of range".to_string(),
            });
        }
        Ok(())
    }
}

/// Coarse classification of a [`DecodeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Discriminator missing or not recognized.
    UnrecognizedType,
    /// Frame structure or field types are wrong.
    Malformed,
}

/// Error returned by [`decode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The `type` field is missing, not a string, or not a known tag.
    #[error("unrecognized message type: {}", .tag.as_deref().unwrap_or("<missing>"))]
    UnrecognizedType {
        /// The tag that was found, if any.
        tag: Option<String>,
    },

    /// The frame is not valid JSON or does not match the tagged shape.
    #[error("malformed frame: {reason}")]
    Malformed {
        /// Parser or validation message.
        reason: String,
    },
}

impl DecodeError {
    /// Returns the coarse kind of this error.
    #[must_use]
    pub const fn kind(&self) -> DecodeErrorKind {
        match self {
            Self::UnrecognizedType { .. } => DecodeErrorKind::UnrecognizedType,
            Self::Malformed { .. } => DecodeErrorKind::Malformed,
        }
    }
}

/// Decodes one text frame.
///
/// # Errors
///
/// Returns [`DecodeError::UnrecognizedType`] when the discriminator is
/// missing or unknown, and [`DecodeError::Malformed`] for anything else
/// that does not match the expected shape.
pub fn decode(raw: &str) -> Result<Message, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::Malformed {
            reason: e.to_string(),
        })?;

    let Some(object) = value.as_object() else {
        return Err(DecodeError::Malformed {
            reason: "frame is not a JSON object".to_string(),
        });
    };

    let Some(tag) = object.get(TYPE_FIELD).and_then(|v| v.as_str()) else {
        return Err(DecodeError::UnrecognizedType { tag: None });
    };
    if !KNOWN_TYPES.contains(&tag) {
        return Err(DecodeError::UnrecognizedType {
            tag: Some(tag.to_string()),
        });
    }

    let message: Message = serde_json::from_value(value).map_err(|e| DecodeError::Malformed {
        reason: e.to_string(),
    })?;
    message.validate()?;
    Ok(message)
}

/// Encodes a message into the wire format accepted by [`decode`].
///
/// # Errors
///
/// Returns [`DecodeError::Malformed`] if serialization fails.
pub fn encode(message: &Message) -> Result<String, DecodeError> {
    serde_json::to_string(message).map_err(|e| DecodeError::Malformed {
        reason: e.to_string(),
    })
}
