//! Attachment upload capability.

use async_trait::async_trait;

use crate::protocol::MessageKind;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("upload of {file_name} failed: {reason}")]
    Failed { file_name: String, reason: String },
}

/// A file picked by the user, not yet uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Images render inline; everything else is a download link.
    pub fn message_kind(&self) -> MessageKind {
        if self.mime_type.starts_with("image/") {
            MessageKind::Image
        } else {
            MessageKind::File
        }
    }

    /// Object key under which an upload taken at `now_millis` is stored.
    pub fn storage_key(&self, room_id: &str, now_millis: i64) -> String {
        format!("files/{room_id}/{now_millis}_{}", self.file_name)
    }
}

/// Blob storage that turns an attachment into a downloadable URL.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, room_id: &str, attachment: &Attachment) -> Result<String, UploadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(name: &str, mime: &str) -> Attachment {
        Attachment {
            file_name: name.into(),
            mime_type: mime.into(),
            bytes: vec![1, 2, 3],
        }
    }

    #[test]
    fn kind_from_mime_type() {
        assert_eq!(attachment("a.png", "image/png").message_kind(), MessageKind::Image);
        assert_eq!(attachment("a.pdf", "application/pdf").message_kind(), MessageKind::File);
        assert_eq!(attachment("a", "").message_kind(), MessageKind::File);
    }

    #[test]
    fn storage_key_layout() {
        assert_eq!(
            attachment("cat.png", "image/png").storage_key("R1", 1700),
            "files/R1/1700_cat.png"
        );
    }
}
