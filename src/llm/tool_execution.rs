mod agent_loop;
mod dispatch;

pub use agent_loop::{
    LoopFinish, LoopReport, LoopState, RoundOutcome, run_conversation_loop, stream_lines,
};
pub use dispatch::Dispatcher;
