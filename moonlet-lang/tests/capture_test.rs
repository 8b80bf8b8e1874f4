use std::collections::HashMap;
use std::rc::Rc;

use moonlet_lang::interner::ToSymbol;
use moonlet_lang::runtime::executor::Executor;
use moonlet_lang::runtime::value::{Table, Value};
use moonlet_lang::runtime::vm::{
    Activation, CaptureRef, ClosureContext, CodeAddr, Frame, FuncProto, Machine, Program,
    SymbolRef,
};
use moonlet_lang::runtime::{Error, ErrorKind};

type Body = Box<dyn Fn(&mut Activation<'_>) -> Result<Value, Error>>;

#[derive(Default)]
struct ScriptedExecutor {
    bodies: HashMap<usize, Body>,
}

impl ScriptedExecutor {
    fn with(
        mut self,
        entry: CodeAddr,
        body: impl Fn(&mut Activation<'_>) -> Result<Value, Error> + 'static,
    ) -> Self {
        self.bodies.insert(entry.0, Box::new(body));
        self
    }
}

impl Executor for ScriptedExecutor {
    fn run(&self, entry: CodeAddr, activation: &mut Activation<'_>) -> Result<Value, Error> {
        self.bodies
            .get(&entry.0)
            .unwrap_or_else(|| panic!("no body at {entry}"))(activation)
    }
}

fn num(v: &Value) -> f64 {
    v.as_number().expect("number expected")
}

fn as_fn_value(v: Value) -> Value {
    assert_eq!(v.type_name(), "function");
    v
}

/// An account factory whose deposit/withdraw/balance closures all capture the
/// same balance local. Everything observable after `make_account` returns
/// goes through one shared cell.
#[test]
fn account_closures_share_balance_across_frame_return() {
    let make_account = CodeAddr(0x000);
    let deposit = CodeAddr(0x010);
    let balance = CodeAddr(0x020);

    //fn make_account(opening) {
    //  let total = opening
    //  return { deposit = |n| { total = total + n; total }, balance = || total }
    //}
    let executor = ScriptedExecutor::default()
        .with(make_account, |act| {
            act.set_local(1, act.local(0));
            let dep = act.make_closure(1)?;
            let bal = act.make_closure(2)?;
            let t = Table::new();
            t.set("deposit".to_symbol(), dep);
            t.set("balance".to_symbol(), bal);
            Ok(Value::Table(t))
        })
        .with(deposit, |act| {
            let total = num(&act.upvalue(0)) + num(&act.local(0));
            act.set_upvalue(0, total.into());
            Ok(act.upvalue(0))
        })
        .with(balance, |act| Ok(act.upvalue(0)));

    let prog = Program {
        fn_table: vec![
            (
                "make_account".to_symbol(),
                FuncProto {
                    nparams: 1,
                    nslots: 2,
                    entry: make_account,
                    symbols: vec![SymbolRef::Local(0), SymbolRef::Local(1)],
                    captures: vec![],
                },
            ),
            (
                "deposit".to_symbol(),
                FuncProto {
                    nparams: 1,
                    nslots: 1,
                    entry: deposit,
                    symbols: vec![SymbolRef::Upvalue(0), SymbolRef::Local(0)],
                    captures: vec![CaptureRef::ParentLocal(1)],
                },
            ),
            (
                "balance".to_symbol(),
                FuncProto {
                    nparams: 0,
                    nslots: 0,
                    entry: balance,
                    symbols: vec![SymbolRef::Upvalue(0)],
                    captures: vec![CaptureRef::ParentLocal(1)],
                },
            ),
        ],
    };

    let mut machine = Machine::new(Rc::new(executor));
    let mut root = Frame::new(0);
    let factory = machine
        .instantiate(&prog, 0, &mut root, &ClosureContext::empty())
        .unwrap();
    let account = machine.call(&prog, &factory, &[100.0.into()]).unwrap();
    let Value::Table(account) = account else {
        panic!("make_account must return a table")
    };
    let dep = as_fn_value(account.get("deposit".to_symbol()));
    let bal = as_fn_value(account.get("balance".to_symbol()));

    let (Value::Function(dep), Value::Function(bal)) = (&dep, &bal) else {
        unreachable!()
    };
    assert_eq!(num(&machine.call(&prog, bal, &[]).unwrap()), 100.0);
    assert_eq!(num(&machine.call(&prog, dep, &[25.0.into()]).unwrap()), 125.0);
    // the factory frame is gone; the sibling still reads the shared cell
    assert_eq!(num(&machine.call(&prog, bal, &[]).unwrap()), 125.0);

    // a second account is a distinct closure pair over a distinct cell
    let account2 = machine.call(&prog, &factory, &[1.0.into()]).unwrap();
    let Value::Table(account2) = account2 else {
        panic!()
    };
    let Value::Function(bal2) = account2.get("balance".to_symbol()) else {
        panic!()
    };
    assert_eq!(num(&machine.call(&prog, &bal2, &[]).unwrap()), 1.0);
    assert_eq!(num(&machine.call(&prog, bal, &[]).unwrap()), 125.0);
}

#[test]
fn closures_never_cross_interpreter_instances() {
    let entry = CodeAddr(0x100);
    let make_executor = || {
        ScriptedExecutor::default().with(entry, |act| {
            act.set_global("seen".to_symbol(), true.into());
            Ok(Value::Nil)
        })
    };
    let prog = Program {
        fn_table: vec![(
            "probe".to_symbol(),
            FuncProto {
                nparams: 0,
                nslots: 0,
                entry,
                symbols: vec![SymbolRef::Global("seen".to_symbol())],
                captures: vec![],
            },
        )],
    };

    let machine_a = Machine::new(Rc::new(make_executor()));
    let mut machine_b = Machine::new(Rc::new(make_executor()));
    let mut root = Frame::new(0);
    let cls = machine_a
        .instantiate(&prog, 0, &mut root, &ClosureContext::empty())
        .unwrap();

    let err = machine_b.call(&prog, &cls, &[]).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::ForeignClosure { .. }));
    assert!(!err.is_internal());
    // instance B's globals were never touched
    assert_eq!(machine_b.get_global("seen".to_symbol()), Value::Nil);
}

#[test]
fn zero_capture_closures_are_independent_callables() {
    let entry = CodeAddr(0x200);
    let executor = ScriptedExecutor::default().with(entry, |act| {
        let n = num(&act.global("count".to_symbol())) + 1.0;
        act.set_global("count".to_symbol(), n.into());
        Ok(n.into())
    });
    let prog = Program {
        fn_table: vec![(
            "tick".to_symbol(),
            FuncProto {
                nparams: 0,
                nslots: 0,
                entry,
                symbols: vec![SymbolRef::Global("count".to_symbol())],
                captures: vec![],
            },
        )],
    };
    let mut machine = Machine::new(Rc::new(executor));
    machine.set_global("count".to_symbol(), 0.0.into());
    let mut root = Frame::new(0);
    let a = machine
        .instantiate(&prog, 0, &mut root, &ClosureContext::empty())
        .unwrap();
    let b = machine
        .instantiate(&prog, 0, &mut root, &ClosureContext::empty())
        .unwrap();
    // same literal, two instantiations: distinct callables with no captured
    // state between them
    assert!(!Rc::ptr_eq(&a, &b));
    assert!(a.context().is_empty() && b.context().is_empty());
    assert_eq!(num(&machine.call(&prog, &a, &[]).unwrap()), 1.0);
    assert_eq!(num(&machine.call(&prog, &b, &[]).unwrap()), 2.0);
}
