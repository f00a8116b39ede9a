//! Register file access and detachable register contexts.

use bitflags as _;
use env_logger as _;
use log as _;
use parking_lot as _;
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
#[cfg(not(feature = "serde"))]
use serde_json as _;
use thiserror as _;

use engine_core::cpu::nullbyte::encoding::encode_primary_word as word;
use engine_core::{
    Arch, Context, Error, ErrorCode, Mode, NullbyteRegister as Reg, Permission,
    RegisterDescriptor, RegisterFile, RegisterKind, Session, SnapshotVersion, Target, Vector128,
    CONTEXT_HEADER_LEN,
};

/// Floating-point and vector registers, as a wider backend would declare them.
const FLOAT_LAYOUT: &[RegisterDescriptor] = &[
    RegisterDescriptor {
        id: 1,
        name: "S0",
        kind: RegisterKind::F32,
    },
    RegisterDescriptor {
        id: 2,
        name: "D0",
        kind: RegisterKind::F64,
    },
    RegisterDescriptor {
        id: 3,
        name: "XMM0",
        kind: RegisterKind::Vector128,
    },
];

fn session(mode: Mode) -> Session {
    Session::open(Arch::Nullbyte, mode).expect("open")
}

fn general_purpose(session: &Session) -> Vec<u16> {
    let ids: Vec<_> = [Reg::R0, Reg::R1, Reg::R2, Reg::R3, Reg::Sp]
        .iter()
        .map(|register| register.id())
        .collect();
    session.reg_read_batch::<u16>(&ids).expect("batch read")
}

#[test]
fn register_layout_is_published() {
    let session = session(Mode::MODE_16);
    let names: Vec<&str> = session.registers().iter().map(|reg| reg.name).collect();
    assert_eq!(
        names,
        ["R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7", "PC", "SP", "FLAGS", "CAUSE", "CYCLES"]
    );
    let cycles = session
        .registers()
        .iter()
        .find(|reg| reg.id == Reg::Cycles.id())
        .expect("cycles");
    assert_eq!(cycles.kind, RegisterKind::U64);
}

#[test]
fn accessors_must_use_the_native_width() {
    let mut session = session(Mode::MODE_16);
    assert_eq!(
        session.reg_read::<u32>(Reg::R0.id()),
        Err(Error::RegisterKindMismatch {
            id: Reg::R0.id(),
            actual: RegisterKind::U16,
            requested: RegisterKind::U32,
        })
    );
    assert!(matches!(
        session.reg_write::<u16>(Reg::Cycles.id(), 1),
        Err(Error::RegisterKindMismatch { .. })
    ));
    assert_eq!(
        session.reg_read::<u16>(99),
        Err(Error::Engine(ErrorCode::InvalidRegister))
    );
    assert_eq!(session.errno(), ErrorCode::InvalidRegister);
}

#[test]
fn batch_write_with_a_bad_entry_writes_nothing() {
    let mut session = session(Mode::MODE_16);
    assert_eq!(
        session.reg_write_batch::<u16>(&[(Reg::R0.id(), 1), (Reg::R1.id(), 2), (0, 3)]),
        Err(Error::Engine(ErrorCode::InvalidRegister))
    );
    assert_eq!(general_purpose(&session), vec![0, 0, 0, 0, 0]);

    session
        .reg_write_batch::<u16>(&[(Reg::R0.id(), 1), (Reg::R1.id(), 2)])
        .expect("batch write");
    assert_eq!(general_purpose(&session)[..2], [1, 2]);
}

#[test]
#[allow(clippy::float_cmp)]
fn float_and_vector_registers_survive_the_image_copy() {
    let mut source = RegisterFile::new(FLOAT_LAYOUT);
    source.write(1, -0.5f32).expect("f32");
    source.write(2, 1e300f64).expect("f64");
    source
        .write(3, Vector128::from_f32x4([1.0, 2.0, -3.0, 4.5]))
        .expect("vector");
    assert_eq!(
        source.read::<f64>(1),
        Err(Error::RegisterKindMismatch {
            id: 1,
            actual: RegisterKind::F32,
            requested: RegisterKind::F64,
        })
    );

    let mut restored = RegisterFile::new(FLOAT_LAYOUT);
    restored.load_bytes(source.as_bytes()).expect("same layout");
    assert_eq!(restored.read::<f32>(1), Ok(-0.5));
    assert_eq!(restored.read::<f64>(2), Ok(1e300));
    assert_eq!(
        restored.read::<Vector128>(3).map(Vector128::to_f32x4),
        Ok([1.0, 2.0, -3.0, 4.5])
    );
    assert_eq!(
        restored.load_bytes(&source.as_bytes()[1..]),
        Err(ErrorCode::InvalidArgument)
    );
}

#[test]
fn restore_brings_back_registers_but_not_memory() {
    let mut session = session(Mode::MODE_16);
    session
        .mem_map(0x1000, 0x1000, Permission::ALL)
        .expect("map");
    session
        .reg_write_batch::<u16>(&[(Reg::R0.id(), 0x1111), (Reg::Sp.id(), 0x1F00)])
        .expect("seed");
    let saved = session.capture().expect("capture");

    // MOV R0, #0x2222; STORE R0 -> [0x1800]; HALT
    let program: Vec<u8> = [word(0x1, 0, 0, 0x0, 4), 0x2222, word(0x3, 0, 0, 0x0, 4), 0x1800, 0x0010]
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .collect();
    session.mem_write(0x1000, &program).expect("load");
    session.start(0x1000, 0xFFFF, 0, 0).expect("run");
    assert_eq!(session.reg_read::<u16>(Reg::R0.id()), Ok(0x2222));
    assert_eq!(session.retired(), 3);

    session.context_restore(&saved).expect("restore");
    assert_eq!(session.reg_read::<u16>(Reg::R0.id()), Ok(0x1111));
    assert_eq!(session.reg_read::<u16>(Reg::Pc.id()), Ok(0));
    assert_eq!(session.reg_read::<u64>(Reg::Cycles.id()), Ok(0));
    assert_eq!(session.retired(), 0);

    let mut stored = [0u8; 2];
    session.mem_read(0x1800, &mut stored).expect("memory untouched");
    assert_eq!(u16::from_le_bytes(stored), 0x2222);
}

#[test]
fn restore_into_another_target_fails_without_side_effects() {
    let little = session(Mode::MODE_16);
    let mut big = session(Mode::MODE_16 | Mode::BIG_ENDIAN);
    big.reg_write::<u16>(Reg::R5.id(), 0x5555).expect("seed");
    let context = little.capture().expect("capture");

    assert_eq!(
        big.context_restore(&context),
        Err(Error::ArchitectureMismatch {
            expected: Target {
                arch: Arch::Nullbyte,
                mode: Mode::MODE_16 | Mode::BIG_ENDIAN,
            },
            found: Target {
                arch: Arch::Nullbyte,
                mode: Mode::MODE_16,
            },
        })
    );
    assert_eq!(big.reg_read::<u16>(Reg::R5.id()), Ok(0x5555));
    assert_eq!(big.errno(), ErrorCode::Ok);
}

#[test]
fn allocated_context_is_reused_across_saves() {
    let mut session = session(Mode::MODE_16);
    let mut context = session.context_alloc().expect("alloc");
    assert_eq!(context.version(), SnapshotVersion::V1);
    assert!(context.registers().iter().all(|byte| *byte == 0));
    assert_eq!(context.encoded_len(), session.context_size().expect("size"));

    session.reg_write::<u16>(Reg::R2.id(), 2).expect("write");
    session.context_save(&mut context).expect("save");
    session.reg_write::<u16>(Reg::R2.id(), 3).expect("write");
    let later = session.capture().expect("capture");
    assert_ne!(context, later);

    session.context_restore(&context).expect("restore");
    assert_eq!(session.reg_read::<u16>(Reg::R2.id()), Ok(2));
}

#[test]
fn contexts_survive_their_session() {
    let context = {
        let mut session = session(Mode::MODE_16);
        session.reg_write::<u16>(Reg::R7.id(), 0x7777).expect("write");
        session.capture().expect("capture")
    };
    let mut next = session(Mode::MODE_16);
    next.context_restore(&context).expect("restore");
    assert_eq!(next.reg_read::<u16>(Reg::R7.id()), Ok(0x7777));
}

#[test]
fn byte_image_restores_into_a_fresh_session() {
    let mut source = session(Mode::MODE_16);
    source
        .reg_write_batch::<u16>(&[(Reg::R1.id(), 0xABCD), (Reg::Flags.id(), 0x3)])
        .expect("seed");
    let image = source.capture().expect("capture").to_bytes();
    assert_eq!(image.len(), source.context_size().expect("size"));
    assert_eq!(&image[..4], b"ECTX");
    assert!(image.len() > CONTEXT_HEADER_LEN);

    let decoded = Context::from_bytes(&image).expect("decode");
    let mut target = session(Mode::MODE_16);
    target.context_restore(&decoded).expect("restore");
    assert_eq!(target.reg_read::<u16>(Reg::R1.id()), Ok(0xABCD));
    assert_eq!(target.reg_read::<u16>(Reg::Flags.id()), Ok(0x3));
}

#[test]
fn truncated_image_is_rejected() {
    let image = session(Mode::MODE_16).capture().expect("capture").to_bytes();
    assert_eq!(
        Context::from_bytes(&image[..image.len() - 1]),
        Err(Error::MalformedContext("length"))
    );
}

#[cfg(feature = "serde")]
#[test]
fn contexts_serialize_with_serde() {
    let mut session = session(Mode::MODE_16);
    session.reg_write::<u16>(Reg::R4.id(), 44).expect("write");
    let context = session.capture().expect("capture");

    let json = serde_json::to_string(&context).expect("serialize");
    let back: Context = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, context);
}
