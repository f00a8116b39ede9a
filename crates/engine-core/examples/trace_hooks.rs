//! Runs a small countdown program with code, memory and port hooks attached
//! and logs every event.
//!
//! ```sh
//! RUST_LOG=debug cargo run -p engine-core --example trace_hooks
//! ```

use bitflags as _;
use parking_lot as _;
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use serde_json as _;
use thiserror as _;

use engine_core::cpu::nullbyte::encoding::encode_primary_word as encode;
use engine_core::{
    Arch, HookRange, HookType, Mode, NullbyteRegister, Permission, Session, SessionConfig,
};

const CODE: u64 = 0x1000;
const DATA: u64 = 0x4000;

fn program() -> Vec<u8> {
    // R0 = 3
    // loop: STORE R0 -> [DATA]; OUT R0 -> port 1; R0 -= 1; BNE loop
    // HALT
    [
        encode(0x1, 0, 0, 0x0, 4),
        3,
        encode(0x3, 0, 0, 0x0, 4),
        0x4000,
        encode(0x8, 0, 0, 0x1, 4),
        1,
        encode(0x4, 0, 0, 0x1, 4),
        1,
        encode(0x6, 0, 0, 0x1, 4),
        0x1004,
        0x0010,
    ]
    .iter()
    .flat_map(|word| word.to_le_bytes())
    .collect()
}

fn main() -> Result<(), engine_core::Error> {
    env_logger::init();

    let config = SessionConfig {
        trace_instructions: true,
        ..SessionConfig::default()
    };
    let mut session = Session::open_with_config(Arch::Nullbyte, Mode::MODE_16, config)?;
    session.mem_map(CODE, 0x1000, Permission::READ | Permission::EXEC)?;
    session.mem_map(DATA, 0x1000, Permission::READ | Permission::WRITE)?;
    session.mem_write(CODE, &program())?;

    session.add_block_hook(
        |_, address, size, _| log::info!("block {address:#06x} ({size} bytes)"),
        0,
        HookRange::ALL,
    )?;
    session.add_code_hook(
        |session, address, _, _| {
            let r0 = session
                .reg_read::<u16>(NullbyteRegister::R0.id())
                .unwrap_or_default();
            log::info!("code  {address:#06x} r0={r0}");
        },
        0,
        HookRange::ALL,
    )?;
    session.add_memory_hook(
        HookType::MEM_WRITE,
        |_, access, _| {
            log::info!("write {:#06x} <- {:#x}", access.address, access.value);
        },
        0,
        HookRange::new(DATA, DATA + 0xFFF),
    )?;
    session.add_port_out_hook(
        |_, port, _, value, _| log::info!("out   port {port} <- {value}"),
        0,
        HookRange::ALL,
    )?;

    session.start(CODE, 0xFFFF, 0, 0)?;
    log::info!(
        "retired {} instructions in {} cycles",
        session.retired(),
        session.reg_read::<u64>(NullbyteRegister::Cycles.id())?
    );
    session.close();
    Ok(())
}
