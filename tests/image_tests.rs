use std::sync::Arc;

use kiln::bytecode::{
    builder::FunctionBuilder,
    debug_info::FunctionDebugInfo,
    disassembler::DecodeError,
    function::{BytecodeFunction, Parameters},
    image::{ConstantImage, FunctionImage, ImageError},
    op_code::OpCode,
};
use kiln::runtime::{registry::Registry, value::Value, vm::Vm};

/// `main` builds a closure `twice(x) = x * 2` and calls it on the global
/// `input`.
fn program(registry: &Arc<Registry>) -> Arc<BytecodeFunction> {
    let mut main = FunctionBuilder::new(registry, "main");
    main.file("prog.kn");
    let mut twice = main.child("twice");
    twice
        .params(["x"])
        .get_local(1)
        .load_const(Value::Int(2))
        .op(OpCode::Mul)
        .op(OpCode::Return);
    let twice = twice.build_arc().unwrap();
    main.closure(twice, &[])
        .get_global("input")
        .call(1)
        .op(OpCode::Return);
    main.build_arc().unwrap()
}

#[test]
fn images_survive_json_into_a_fresh_registry() {
    let original = Registry::new();
    let image = FunctionImage::from_function(&program(&original), &original).unwrap();
    let json = image.to_json().unwrap();

    let registry = Registry::new();
    let function = FunctionImage::from_json(&json)
        .unwrap()
        .to_function(&registry)
        .unwrap();
    registry.define_global("input", Value::Int(21));
    let mut vm = Vm::new(registry);

    assert_eq!(vm.run(function, &[]).unwrap(), Value::Int(42));
}

#[test]
fn symbols_are_stored_by_name() {
    let registry = Registry::new();
    let image = FunctionImage::from_function(&program(&registry), &registry).unwrap();

    assert!(image
        .constants
        .contains(&ConstantImage::Symbol("input".to_string())));
    assert_eq!(image.file.as_deref(), Some("prog.kn"));
}

#[test]
fn tampered_instructions_fail_the_checksum() {
    let registry = Registry::new();
    let mut image = FunctionImage::from_function(&program(&registry), &registry).unwrap();
    let last = image.instructions.len() - 1;
    image.instructions[last] = OpCode::ReturnNil as u8;

    let err = image.to_function(&registry).unwrap_err();

    assert!(matches!(err, ImageError::ChecksumMismatch { ref function, .. } if function == "main"));
}

#[test]
fn tampering_a_nested_function_invalidates_its_parent() {
    let registry = Registry::new();
    let mut image = FunctionImage::from_function(&program(&registry), &registry).unwrap();
    for constant in &mut image.constants {
        if let ConstantImage::Function(nested) = constant {
            nested.instructions[0] = OpCode::ReturnNil as u8;
        }
    }

    let err = image.to_function(&registry).unwrap_err();

    assert!(matches!(err, ImageError::ChecksumMismatch { ref function, .. } if function == "main"));
}

#[test]
fn heap_constants_cannot_be_stored() {
    let registry = Registry::new();
    let mut b = FunctionBuilder::new(&registry, "holder");
    b.load_const(Value::array(Vec::new())).op(OpCode::Return);
    let function = b.build().unwrap();

    let err = FunctionImage::from_function(&function, &registry).unwrap_err();

    assert_eq!(
        err.to_string(),
        "constant of type Array in holder cannot be stored in an image"
    );
}

#[test]
fn undecodable_bytecode_is_rejected_on_load() {
    let registry = Registry::new();
    let function = BytecodeFunction::new(
        vec![OpCode::Const8 as u8, 4],
        Vec::new(),
        FunctionDebugInfo::new(Some("broken".to_string()), None, Default::default()),
        Parameters::default(),
        1,
        0,
        Vec::new(),
        false,
        false,
    );
    let image = FunctionImage::from_function(&function, &registry).unwrap();

    let err = image.to_function(&registry).unwrap_err();

    assert!(matches!(
        err,
        ImageError::Decode {
            source: DecodeError::ConstantOutOfBounds { index: 4, len: 0, .. },
            ..
        }
    ));
}

#[test]
fn images_save_and_load_from_disk() {
    let registry = Registry::new();
    let image = FunctionImage::from_function(&program(&registry), &registry).unwrap();
    let path = std::env::temp_dir().join(format!("kiln-image-{}.json", std::process::id()));

    image.save(&path).unwrap();
    let loaded = FunctionImage::load(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(loaded, image);
}

#[test]
fn malformed_json_is_a_parse_error() {
    assert!(matches!(
        FunctionImage::from_json("{ \"name\": 3 }"),
        Err(ImageError::Parse(_))
    ));
    assert!(matches!(
        FunctionImage::load("/nonexistent/kiln.json"),
        Err(ImageError::Io { .. })
    ));
}
