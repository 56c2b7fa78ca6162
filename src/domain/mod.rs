pub mod card;
pub mod channel;
pub mod feed;
pub mod item;

pub use card::Card;
pub use channel::{Channel, ChannelSetting, Pagination, Timeline, Unread, NOTIFICATIONS_CHANNEL};
pub use feed::{Feed, FeedSummary, FeedUpdate, PushState};
pub use item::{Content, Item, Source};
