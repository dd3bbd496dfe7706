pub mod account_stream;
pub mod client;
pub mod price_stream;

pub use account_stream::{AccountOrderUpdate, AccountStream, AccountTrade};
pub use client::{ExchangeClient, ExchangeOrderResult};
pub use price_stream::{PriceStream, PriceTick};
