pub mod mapper;
pub mod referral;
pub mod store;
pub mod types;

pub use mapper::{map_row, ColumnLayout, KycField, MappedRow, RowShape};
pub use referral::clean_referral;
pub use store::{HttpKycStore, KycStore, MemoryKycStore};
pub use types::{KycRecord, KycResult};
