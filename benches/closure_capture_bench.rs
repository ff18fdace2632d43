use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use kiln::bytecode::{
    builder::FunctionBuilder, disassembler::Capture, function::BytecodeFunction, op_code::OpCode,
};
use kiln::runtime::{registry::Registry, value::Value, vm::Vm};

struct Scenario {
    name: &'static str,
    captures: usize,
    creates: u64,
}

/// Builds a loop that creates `creates` closures over `captures` locals and
/// calls each one once. The closure sums its upvalues.
fn build_capture_program(vm: &Vm, captures: usize, creates: u64) -> Arc<BytecodeFunction> {
    let mut main = FunctionBuilder::new(vm.registry(), "main");
    let mut sum = main.child("sum");
    sum.upvalues(captures).load_const(Value::Int(0));
    for index in 0..captures {
        sum.get_upvalue(index).op(OpCode::Add);
    }
    sum.op(OpCode::Return);
    let sum = sum.build_arc().unwrap();

    // slot 1: counter, slot 2: total, slots 3.. captured values
    let counter = 1;
    let total = 2;
    main.locals(3 + captures)
        .load_const(Value::Int(0))
        .set_local(counter)
        .load_const(Value::Int(0))
        .set_local(total);
    for index in 0..captures {
        main.load_const(Value::Int(index as i64 + 1))
            .set_local(3 + index);
    }
    let specs: Vec<Capture> = (0..captures)
        .map(|index| Capture {
            local: true,
            index: 3 + index,
        })
        .collect();

    let top = main.here();
    let done = main.label();
    main.get_local(counter)
        .load_const(Value::Int(creates as i64))
        .op(OpCode::Less)
        .jump_if_false(done)
        .closure(sum.clone(), &specs)
        .call(0)
        .get_local(total)
        .op(OpCode::Add)
        .set_local(total)
        .close_upvalues(3)
        .get_local(counter)
        .load_const(Value::Int(1))
        .op(OpCode::Add)
        .set_local(counter)
        .jump(top);
    main.bind(done).get_local(total).op(OpCode::Return);
    main.build_arc().unwrap()
}

fn build_scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "no_capture",
            captures: 0,
            creates: 1_024,
        },
        Scenario {
            name: "capture_1",
            captures: 1,
            creates: 1_024,
        },
        Scenario {
            name: "capture_4",
            captures: 4,
            creates: 1_024,
        },
        Scenario {
            name: "capture_16",
            captures: 16,
            creates: 1_024,
        },
    ]
}

fn bench_closure_capture(c: &mut Criterion) {
    let scenarios = build_scenarios();
    let mut group = c.benchmark_group("vm/closure_capture");

    for scenario in scenarios {
        let mut vm = Vm::new(Registry::new());
        let function = build_capture_program(&vm, scenario.captures, scenario.creates);
        group.throughput(Throughput::Elements(scenario.creates));
        group.bench_with_input(
            BenchmarkId::from_parameter(scenario.name),
            &function,
            |b, function| {
                b.iter(|| {
                    let result = vm.run(function.clone(), &[]).unwrap();
                    black_box(result);
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_closure_capture);
criterion_main!(benches);
