pub mod account;
pub mod contact;
pub mod emotion;

pub use account::{
    Account, AccountRole, AccountSnapshot, AccountSummary, Claims, LoginRequest, RegisterRequest,
    SessionRecord, UpdateProfileRequest,
};
pub use contact::{ContactMessage, ContactRequest, NewsletterRequest, NewsletterSubscription};
pub use emotion::{
    EmotionLabel, EmotionRecord, ImageAnalysis, ImageAnalysisRequest, RecognizeRequest,
    RecordEmotionRequest,
};
