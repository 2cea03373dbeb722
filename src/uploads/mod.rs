//! Direct-to-storage uploads through presigned links.

pub mod config;
pub mod presign;

pub use config::UploadConfig;
pub use presign::{
    PresignError, PresignResult, UploadLink, UploadPresigner, UploadRequest, UploadTokenLedger,
    VerifiedUpload,
};
