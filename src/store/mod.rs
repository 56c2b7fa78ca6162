pub mod sqlite;

use crate::app::Result;
use crate::domain::{Channel, ChannelSetting, Feed, FeedUpdate};

pub use sqlite::SqliteStore;

pub trait Store {
    // Channel operations
    fn add_channel(&self, uid: &str, name: &str) -> Result<Channel>;
    fn get_channel(&self, uid: &str) -> Result<Option<Channel>>;
    fn get_all_channels(&self) -> Result<Vec<Channel>>;
    fn rename_channel(&self, uid: &str, name: &str) -> Result<()>;
    fn delete_channel(&self, uid: &str) -> Result<()>;

    // Setting operations
    fn get_setting(&self, channel_uid: &str) -> Result<ChannelSetting>;
    fn save_setting(&self, channel_uid: &str, setting: &ChannelSetting) -> Result<()>;
    fn get_all_settings(&self) -> Result<Vec<(String, ChannelSetting)>>;

    // Feed operations
    fn add_feed(&self, feed: &Feed) -> Result<i64>;
    fn get_feed(&self, id: i64) -> Result<Option<Feed>>;
    fn get_feed_by_url(&self, channel_uid: &str, url: &str) -> Result<Option<Feed>>;
    fn get_feeds_by_channel(&self, channel_uid: &str) -> Result<Vec<Feed>>;
    fn get_all_feeds(&self) -> Result<Vec<Feed>>;
    fn update_feed(&self, id: i64, update: &FeedUpdate) -> Result<()>;
    fn delete_feed(&self, id: i64) -> Result<()>;
}
