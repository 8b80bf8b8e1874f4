use super::value::Value;
use super::vm::program::CodeAddr;
use super::vm::Activation;
use super::Error;

/// The bytecode execution loop, owned by the embedding. The machine hands it
/// an entry address and an [`Activation`] giving scoped access to the call's
/// frame, closure context and environment; everything the body does flows
/// back through that activation.
pub trait Executor {
    fn run(&self, entry: CodeAddr, activation: &mut Activation<'_>) -> Result<Value, Error>;
}

pub(crate) struct DummyExecutor;

impl Executor for DummyExecutor {
    fn run(&self, _entry: CodeAddr, _activation: &mut Activation<'_>) -> Result<Value, Error> {
        panic!("dummy executor invoked")
    }
}
