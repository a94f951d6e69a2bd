use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    origin: String,
    payload: Bytes,
}

impl Message {
    pub fn new(origin: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            origin: origin.into(),
            payload: payload.into(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Reply written back to the sender after its message has been queued.
pub fn acknowledgement(message: &Message) -> Bytes {
    Bytes::from(format!(
        "Hey {}. I got your message: {}",
        message.origin(),
        message.text()
    ))
}
