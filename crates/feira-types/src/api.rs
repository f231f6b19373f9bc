use serde::{Deserialize, Serialize};

use crate::models::Location;

// -- JWT Claims --

/// Claims of the bearer token issued by the identity service. Shared by
/// feira-api (REST middleware) and feira-gateway (WebSocket identify).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

// -- Send message --

pub const MAX_CONTENT_CHARS: usize = 4000;

/// Inbound `sendMessage` payload as the client sent it. Nothing here is
/// trusted until [`SendMessageDto::validate`] has run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageDto {
    #[serde(default)]
    pub receiver_id: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub ad_id: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub location: Option<LocationDto>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationDto {
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lng: Option<f64>,
    #[serde(default)]
    pub address: Option<String>,
}

/// A single rejected field of an inbound payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

/// A `sendMessage` payload that passed validation. The sender is not part of
/// it: identity always comes from the authenticated session.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub receiver_id: String,
    pub content: Option<String>,
    pub ad_id: Option<String>,
    pub image_url: Option<String>,
    pub location: Option<Location>,
}

impl SendMessageDto {
    pub fn validate(self) -> Result<OutgoingMessage, Vec<FieldError>> {
        let mut errors = Vec::new();

        let receiver_id = non_blank(self.receiver_id);
        if receiver_id.is_none() {
            errors.push(FieldError::new("receiverId", "is required"));
        }

        let content = non_blank(self.content);
        if let Some(text) = &content {
            if text.chars().count() > MAX_CONTENT_CHARS {
                errors.push(FieldError::new(
                    "content",
                    &format!("must be at most {} characters", MAX_CONTENT_CHARS),
                ));
            }
        }

        let image_url = non_blank(self.image_url);
        let ad_id = non_blank(self.ad_id);

        let location_supplied = self.location.is_some();
        let location = match self.location {
            Some(dto) => match dto.validate() {
                Ok(location) => Some(location),
                Err(mut location_errors) => {
                    errors.append(&mut location_errors);
                    None
                }
            },
            None => None,
        };

        if content.is_none() && image_url.is_none() && !location_supplied {
            errors.push(FieldError::new(
                "content",
                "is required unless imageUrl or location is present",
            ));
        }

        match receiver_id {
            Some(receiver_id) if errors.is_empty() => Ok(OutgoingMessage {
                receiver_id,
                content,
                ad_id,
                image_url,
                location,
            }),
            _ => Err(errors),
        }
    }
}

impl LocationDto {
    fn validate(self) -> Result<Location, Vec<FieldError>> {
        let mut errors = Vec::new();

        match self.lat {
            None => errors.push(FieldError::new("location.lat", "is required")),
            Some(lat) if !(-90.0..=90.0).contains(&lat) => {
                errors.push(FieldError::new("location.lat", "must be between -90 and 90"))
            }
            Some(_) => {}
        }
        match self.lng {
            None => errors.push(FieldError::new("location.lng", "is required")),
            Some(lng) if !(-180.0..=180.0).contains(&lng) => {
                errors.push(FieldError::new("location.lng", "must be between -180 and 180"))
            }
            Some(_) => {}
        }

        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) if errors.is_empty() => Ok(Location {
                lat,
                lng,
                address: non_blank(self.address),
            }),
            _ => Err(errors),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

// -- REST responses --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountResponse {
    pub counterpart_id: String,
    pub unread_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    pub message_id: uuid::Uuid,
    /// `false` when the message had already been read.
    pub transitioned: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
}
