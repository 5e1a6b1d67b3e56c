pub use crate::{
    execution_engine::{ExecutionEngine, MockExecutionEngine, NullExecutionEngine, Verdict},
    request::{Error, NewPayloadRequest, PayloadCheck, PayloadStatus},
};

mod execution_engine;
mod request;
