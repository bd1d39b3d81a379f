//! Composable decision chains: guards gate entries, exit policies close
//! positions.

pub mod exits;
pub mod guards;

pub use exits::{
    EmergencyExit, ExitContext, ExitPipeline, ExitPolicy, ExitReason, StopLoss, TakeProfit,
    TimeExit,
};
pub use guards::{
    DailyLossLimit, GuardContext, GuardPipeline, GuardPolicy, GuardVerdict, MaxExposure,
    MaxOpenPositions, MaxSpread, MinBalance, NoPendingOrders,
};
