pub mod chat;
pub mod identity;
pub mod livestream;
pub mod role;

pub use chat::{AddChatRequest, ChatCursor, ChatId, ChatMessage, NewChatMessage};
pub use identity::Identity;
pub use livestream::{
    CreateLivestreamRequest, CreateLivestreamResponse, Livestream, LivestreamDetail,
    LivestreamSummary, MuteUserRequest, UpdateLivestreamRequest, Visibility,
};
pub use role::Role;
