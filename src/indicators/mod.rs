//! Indicator Library
//!
//! Pure series-in, value-out calculations used by the dashboard pipeline.
//! Every function that needs a minimum amount of history returns `None` (or an
//! empty series) when the input is too short, so callers can tell "no signal"
//! apart from a computed neutral value.

pub mod ema;
pub mod smi;
pub mod squeeze;
pub mod volatility;

pub use ema::{Posture, ema, ema_last, ema_posture, ema_sign};
pub use smi::{SmiSeries, smi};
pub use squeeze::squeeze_psi;
pub use volatility::{atr_volatility_pct, liquidity_pct, scaled_volatility, true_range};
