use crate::exchange::PriceTick;
use crate::types::Candle;

/// Everything the event loop can receive on its single channel. Producers
/// never block on a full channel: `NewCandle` is sent with a blocking
/// `send` (it must never be dropped), everything else uses `try_send` and
/// is discarded on backpressure.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    NewCandle(Candle),
    PriceUpdate(PriceTick),
    OrderBookUpdate,
    Alert(String),
}
