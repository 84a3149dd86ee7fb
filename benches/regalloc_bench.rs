use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rvlower::ast::{BinaryOp, CmpOp, Cond, Expr, Function, Program, Scope, Stmt, Symbol, Type};
use rvlower::compiler::RegisterAllocator;
use rvlower::{CompileOptions, Compiler};

/// A function with a long expression chain inside a loop
fn busy_function(name: &str, terms: usize) -> Function {
    let locals: Vec<Symbol> = (0..8)
        .map(|i| Symbol::local(format!("v{}", i), Type::Int, -4 * (i + 1)))
        .collect();

    let mut sum = Expr::var(&locals[0]);
    for i in 1..terms {
        let term = Expr::binary(
            BinaryOp::Mul,
            Expr::var(&locals[i % locals.len()]),
            Expr::int(i as i64),
        );
        sum = Expr::binary(BinaryOp::Add, sum, term);
    }

    let mut body: Vec<Stmt> = locals
        .iter()
        .enumerate()
        .map(|(i, v)| Stmt::Assign {
            target: Expr::var(v),
            value: Expr::int(i as i64),
        })
        .collect();
    body.push(Stmt::While {
        cond: Cond::new(CmpOp::Lt, Expr::var(&locals[0]), Expr::int(100)),
        body: vec![Stmt::Assign {
            target: Expr::var(&locals[0]),
            value: sum,
        }],
    });

    Function {
        name: name.into(),
        params: vec![],
        ret: Type::Void,
        num_locals: locals.len(),
        scope: Scope::new(name),
        body,
    }
}

fn program(functions: usize, terms: usize) -> Program {
    Program {
        globals: Scope::new("global"),
        functions: (0..functions)
            .map(|i| busy_function(&format!("f{}", i), terms))
            .collect(),
    }
}

fn allocator_benchmark(c: &mut Criterion) {
    let program = program(1, 200);
    let compiler = Compiler::new(CompileOptions::default()).unwrap();
    let ir = compiler.lower(&program).unwrap();

    c.bench_function("allocate 200-term chain, 32 registers", |b| {
        let allocator = RegisterAllocator::new(32, 32, 4);
        b.iter(|| allocator.allocate(black_box(&ir[0])).unwrap())
    });

    c.bench_function("allocate 200-term chain, 6 registers", |b| {
        let allocator = RegisterAllocator::new(6, 2, 4);
        b.iter(|| allocator.allocate(black_box(&ir[0])).unwrap())
    });
}

fn compile_benchmark(c: &mut Criterion) {
    let program = program(32, 50);

    c.bench_function("compile 32 functions sequentially", |b| {
        let compiler = Compiler::new(CompileOptions {
            parallel: false,
            ..CompileOptions::default()
        })
        .unwrap();
        b.iter(|| compiler.compile(black_box(&program)).unwrap())
    });

    c.bench_function("compile 32 functions in parallel", |b| {
        let compiler = Compiler::new(CompileOptions::default()).unwrap();
        b.iter(|| compiler.compile(black_box(&program)).unwrap())
    });
}

criterion_group!(benches, allocator_benchmark, compile_benchmark);
criterion_main!(benches);
