//! Property-based tests for the register allocator
//!
//! These tests use proptest to generate random straight-line blocks, loops
//! with forward branches, and register-file operation sequences and verify
//! that:
//! 1. Allocated code computes the same memory state as the virtual code
//! 2. Register descriptors never violate their invariants
//! 3. Values spilled under register pressure are reloaded intact

use proptest::prelude::*;
use rvlower::ast::Type;
use rvlower::compiler::ir::{FunctionIr, Instruction, Opcode, Operand, PhysReg, RegClass, ValueKind};
use rvlower::compiler::{RegisterAllocator, RegisterFile};
use rvlower::{Interpreter, Word};

const LOCALS: usize = 4;

// =============================================================================
// STRATEGY GENERATORS
// =============================================================================

#[derive(Debug, Clone)]
enum Step {
    /// Load an immediate into a new temp or a local
    Const { to_local: Option<usize>, value: i64 },
    /// Combine two earlier values into a new temp or a local
    Arith {
        op: Opcode,
        to_local: Option<usize>,
        a: usize,
        b: usize,
    },
}

fn arith_opcode() -> impl Strategy<Value = Opcode> {
    prop_oneof![Just(Opcode::Add), Just(Opcode::Sub), Just(Opcode::Mul)]
}

fn destination() -> impl Strategy<Value = Option<usize>> {
    prop_oneof![Just(None), (0..LOCALS).prop_map(Some)]
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        (destination(), -50i64..50).prop_map(|(to_local, value)| Step::Const { to_local, value }),
        (arith_opcode(), destination(), any::<usize>(), any::<usize>())
            .prop_map(|(op, to_local, a, b)| Step::Arith { op, to_local, a, b }),
    ]
}

fn local(k: usize) -> Operand {
    Operand::Local {
        offset: -4 * (k as i32 + 1),
        kind: ValueKind::Int,
    }
}

/// Append `steps`, each source picking among the values defined so far
fn emit_steps(
    steps: &[Step],
    code: &mut Vec<Instruction>,
    defined: &mut Vec<Operand>,
    next_temp: &mut u32,
) {
    for s in steps {
        let to_local = match s {
            Step::Const { to_local, .. } | Step::Arith { to_local, .. } => *to_local,
        };
        let dest = match to_local {
            Some(k) => local(k),
            None => {
                *next_temp += 1;
                Operand::int_temp(*next_temp)
            }
        };
        match s {
            Step::Const { value, .. } => {
                code.push(Instruction::op2(Opcode::Li, dest.clone(), Operand::Imm(*value)));
            }
            Step::Arith { op, a, b, .. } => {
                let a = defined[a % defined.len()].clone();
                let b = defined[b % defined.len()].clone();
                code.push(Instruction::op3(*op, dest.clone(), a, b));
            }
        }
        if !defined.contains(&dest) {
            defined.push(dest);
        }
    }
}

/// Initialise every local, returning the values defined so far
fn seed_locals(seeds: &[i64], code: &mut Vec<Instruction>) -> Vec<Operand> {
    seeds
        .iter()
        .enumerate()
        .map(|(k, seed)| {
            code.push(Instruction::op2(Opcode::Li, local(k), Operand::Imm(*seed)));
            local(k)
        })
        .collect()
}

/// Build a straight-line block: every local is initialised first
fn build_block(seeds: &[i64], steps: &[Step]) -> Vec<Instruction> {
    let mut code = Vec::new();
    let mut defined = seed_locals(seeds, &mut code);
    let mut next_temp = 0;
    emit_steps(steps, &mut code, &mut defined, &mut next_temp);
    code
}

/// Shape of a generated loop
#[derive(Debug, Clone)]
struct LoopShape {
    pre: Vec<Step>,
    body: Vec<Step>,
    /// Steps jumped over when the forward branch is taken
    skipped: Vec<Step>,
    /// Operands compared by the forward branch
    test: (usize, usize),
    /// Value added to the accumulator each trip
    addend: usize,
    trips: i64,
}

fn loop_shape() -> impl Strategy<Value = LoopShape> {
    (
        prop::collection::vec(step(), 0..8),
        prop::collection::vec(step(), 1..12),
        prop::collection::vec(step(), 0..8),
        (any::<usize>(), any::<usize>()),
        any::<usize>(),
        1i64..5,
    )
        .prop_map(|(pre, body, skipped, test, addend, trips)| LoopShape {
            pre,
            body,
            skipped,
            test,
            addend,
            trips,
        })
}

/// Build a counted loop whose accumulator and counter temps are carried
/// around the back edge, with a forward branch inside the body:
///
/// ```text
///   locals = seeds; counter = trips; acc = 0; pre
/// loop_1:
///   body
///   BGE a, b, skip_1
///   skipped
/// skip_1:
///   acc = acc + v; counter = counter - 1
///   BGT counter, x0, loop_1
///   local0 = acc
/// ```
fn build_loop(seeds: &[i64], shape: &LoopShape) -> Vec<Instruction> {
    let mut code = Vec::new();
    let mut defined = seed_locals(seeds, &mut code);
    let counter = Operand::int_temp(900);
    let acc = Operand::int_temp(901);
    let mut next_temp = 0;

    code.push(Instruction::op2(Opcode::Li, counter.clone(), Operand::Imm(shape.trips)));
    code.push(Instruction::op2(Opcode::Li, acc.clone(), Operand::Imm(0)));
    emit_steps(&shape.pre, &mut code, &mut defined, &mut next_temp);

    code.push(Instruction::label("loop_1"));
    emit_steps(&shape.body, &mut code, &mut defined, &mut next_temp);

    let (a, b) = shape.test;
    code.push(Instruction::branch(
        Opcode::Bge,
        defined[a % defined.len()].clone(),
        defined[b % defined.len()].clone(),
        "skip_1",
    ));
    // Temps defined on the skipped path are not defined on every path
    let mark = defined.len();
    emit_steps(&shape.skipped, &mut code, &mut defined, &mut next_temp);
    defined.truncate(mark);
    code.push(Instruction::label("skip_1"));

    let addend = defined[shape.addend % defined.len()].clone();
    code.push(Instruction::op3(Opcode::Add, acc.clone(), acc.clone(), addend));
    code.push(Instruction::op3(Opcode::Addi, counter.clone(), counter.clone(), Operand::Imm(-1)));
    code.push(Instruction::branch(Opcode::Bgt, counter, PhysReg::ZERO.into(), "loop_1"));
    code.push(Instruction::op2(Opcode::Mv, local(0), acc));
    code
}

fn function(code: Vec<Instruction>) -> FunctionIr {
    FunctionIr {
        name: "block".into(),
        params: vec![],
        ret: Type::Void,
        num_locals: LOCALS,
        code,
    }
}

fn final_locals(code: Vec<Instruction>) -> Vec<Word> {
    let mut vm = Interpreter::new(code).unwrap();
    vm.run().unwrap();
    (0..LOCALS)
        .map(|k| vm.frame_slot(-4 * (k as i64 + 1)))
        .collect()
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Allocated code leaves every local with the value the virtual code does
    #[test]
    fn prop_allocation_is_transparent(
        seeds in prop::collection::vec(-100i64..100, LOCALS),
        steps in prop::collection::vec(step(), 1..40),
        int_registers in 6usize..12,
    ) {
        let code = build_block(&seeds, &steps);
        let expected = final_locals(code.clone());

        let allocation = RegisterAllocator::new(int_registers, 2, 4)
            .allocate(&function(code))
            .unwrap();
        prop_assert!(allocation.code.iter().all(|i| !i.is_virtual()));
        prop_assert!(allocation.frame_words >= LOCALS);

        let actual = final_locals(allocation.code);
        prop_assert_eq!(actual, expected);
    }

    /// Transparency also holds across labels, forward branches and a back
    /// edge carrying temps between iterations
    #[test]
    fn prop_allocation_is_transparent_across_blocks(
        seeds in prop::collection::vec(-100i64..100, LOCALS),
        shape in loop_shape(),
        int_registers in 6usize..12,
    ) {
        let code = build_loop(&seeds, &shape);
        let expected = final_locals(code.clone());

        let allocation = RegisterAllocator::new(int_registers, 2, 4)
            .allocate(&function(code))
            .unwrap();
        prop_assert!(allocation.code.iter().all(|i| !i.is_virtual()));

        let actual = final_locals(allocation.code);
        prop_assert_eq!(actual, expected);
    }

    /// Allocation never hands out a reserved or out-of-range register
    #[test]
    fn prop_allocated_registers_are_allocatable(
        seeds in prop::collection::vec(-100i64..100, LOCALS),
        steps in prop::collection::vec(step(), 1..40),
        int_registers in 6usize..12,
    ) {
        let code = build_block(&seeds, &steps);
        let allocation = RegisterAllocator::new(int_registers, 2, 4)
            .allocate(&function(code))
            .unwrap();
        for reg in &allocation.used_registers {
            prop_assert!(!reg.is_reserved(), "{} handed out", reg);
            prop_assert!((reg.index as usize) < int_registers);
        }
    }

    /// Descriptor invariants survive arbitrary bind/retain/release sequences
    #[test]
    fn prop_register_file_invariants(
        ops in prop::collection::vec((0u8..4, 1u32..8, any::<bool>()), 0..60),
        count in 6usize..16,
    ) {
        let mut file = RegisterFile::new(RegClass::Int, count);
        for (kind, id, dirty) in ops {
            let temp = Operand::int_temp(id);
            match kind {
                0 => {
                    if file.find(&temp).is_none() {
                        if let Some((i, _)) = file.choose() {
                            file.unbind(i);
                            file.bind(i, temp, dirty);
                        }
                    }
                }
                1 => {
                    if let Some(i) = file.find(&temp) {
                        file.retain(i);
                    }
                }
                2 => file.release(),
                _ => {
                    if let Some(i) = file.find(&temp) {
                        file.unbind(i);
                    }
                }
            }
            prop_assert!(file.check().is_ok(), "{:?}", file.check());
            if let Some((i, _)) = file.choose() {
                prop_assert!(!file.get(i).reserved);
                prop_assert!(!file.get(i).retained);
            }
        }
        for d in file.descriptors() {
            prop_assert!(!(d.reserved && d.bound.is_some()));
        }
    }

    /// Many simultaneously live temps spill and reload their exact values
    #[test]
    fn prop_spilled_values_round_trip(
        values in prop::collection::vec(-1000i64..1000, 3..20),
    ) {
        let mut code: Vec<Instruction> = values
            .iter()
            .enumerate()
            .map(|(i, v)| Instruction::op2(Opcode::Li, Operand::int_temp(i as u32 + 1), Operand::Imm(*v)))
            .collect();
        // Sum in reverse definition order so every temp stays live until the end
        let n = values.len() as u32;
        let mut acc = Operand::int_temp(n);
        for (k, id) in (1..n).rev().enumerate() {
            let dest = Operand::int_temp(n + 1 + k as u32);
            code.push(Instruction::op3(Opcode::Add, dest.clone(), acc, Operand::int_temp(id)));
            acc = dest;
        }
        code.push(Instruction::op2(Opcode::Mv, local(0), acc));

        let allocation = RegisterAllocator::new(6, 2, 4)
            .allocate(&function(code))
            .unwrap();
        prop_assert!(allocation.spills >= values.len() - 2);

        let mut vm = Interpreter::new(allocation.code).unwrap();
        vm.run().unwrap();
        prop_assert_eq!(vm.frame_slot(-4), Word::Int(values.iter().sum()));
        prop_assert_eq!(vm.reg(PhysReg::ZERO), Word::Int(0));
    }
}
