//! Mapping table, permission and direct transfer behaviour.

use bitflags as _;
use env_logger as _;
use log as _;
use parking_lot as _;
#[cfg(feature = "serde")]
use serde as _;
use serde_json as _;
use thiserror as _;

use engine_core::{
    Arch, Error, ErrorCode, ExternalBuffer, Mode, Permission, Region, Session, SessionConfig,
};
use proptest::prelude::*;
use rstest::rstest;

const PAGE: u64 = 0x1000;

fn session() -> Session {
    Session::open(Arch::Nullbyte, Mode::MODE_16).expect("open")
}

fn regions(session: &Session) -> Vec<(u64, u64, Permission)> {
    session
        .mem_regions()
        .expect("regions")
        .into_iter()
        .map(|region| (region.begin, region.end, region.perms))
        .collect()
}

#[rstest]
#[case::misaligned_address(0x1001, PAGE)]
#[case::misaligned_size(0x1000, 0x800)]
#[case::zero_size(0x1000, 0)]
fn misaligned_mappings_are_caller_errors(#[case] address: u64, #[case] size: u64) {
    let mut session = session();
    let error = session
        .mem_map(address, size, Permission::ALL)
        .expect_err("rejected");
    assert!(error.is_caller_error(), "{error:?}");
    assert_eq!(session.errno(), ErrorCode::Ok);
    assert!(regions(&session).is_empty());
}

#[test]
fn permission_bits_outside_all_are_rejected() {
    assert_eq!(Permission::from_raw(7), Ok(Permission::ALL));
    assert_eq!(Permission::from_raw(8), Err(Error::InvalidPermissions(8)));
}

#[test]
fn unknown_permission_bits_never_reach_the_table() {
    let mut session = session();
    assert_eq!(
        session.mem_map(0x1000, PAGE, Permission::from_bits_retain(0xF9)),
        Err(Error::InvalidPermissions(0xF9))
    );
    assert_eq!(
        session.mem_map_external(
            0x1000,
            PAGE,
            Permission::from_bits_retain(0x10),
            ExternalBuffer::zeroed(0x1000)
        ),
        Err(Error::InvalidPermissions(0x10))
    );
    assert!(regions(&session).is_empty());

    session.mem_map(0x2000, PAGE, Permission::READ).expect("map");
    assert_eq!(
        session.mem_protect(0x2000, PAGE, Permission::from_bits_retain(0x40)),
        Err(Error::InvalidPermissions(0x40))
    );
    assert_eq!(regions(&session), vec![(0x2000, 0x2FFF, Permission::READ)]);
    assert_eq!(session.errno(), ErrorCode::Ok);
}

#[test]
fn alignment_follows_configured_page_size() {
    let config = SessionConfig {
        page_size: 0x100,
        ..SessionConfig::default()
    };
    let mut session =
        Session::open_with_config(Arch::Nullbyte, Mode::MODE_16, config).expect("open");
    session
        .mem_map(0x100, 0x100, Permission::READ)
        .expect("small page");
    assert_eq!(regions(&session), vec![(0x100, 0x1FF, Permission::READ)]);
}

#[rstest]
#[case::same_range(0x2000, 0x2000)]
#[case::covers_start(0x1000, 0x2000)]
#[case::covers_end(0x3000, 0x2000)]
#[case::inside(0x2000, PAGE)]
fn overlapping_maps_fail(#[case] address: u64, #[case] size: u64) {
    let mut session = session();
    session
        .mem_map(0x2000, 0x2000, Permission::ALL)
        .expect("map");
    assert_eq!(
        session.mem_map(address, size, Permission::ALL),
        Err(Error::Engine(ErrorCode::MapOverlap))
    );
    assert_eq!(regions(&session).len(), 1);
}

#[test]
fn map_table_capacity_is_enforced() {
    let config = SessionConfig {
        max_regions: 2,
        ..SessionConfig::default()
    };
    let mut session =
        Session::open_with_config(Arch::Nullbyte, Mode::MODE_16, config).expect("open");
    session.mem_map(0, PAGE, Permission::ALL).expect("first");
    session.mem_map(PAGE, PAGE, Permission::ALL).expect("second");
    assert_eq!(
        session.mem_map(2 * PAGE, PAGE, Permission::ALL),
        Err(Error::Engine(ErrorCode::MapTableFull))
    );
    assert_eq!(session.errno(), ErrorCode::MapTableFull);
}

#[test]
fn unmap_requires_whole_regions() {
    let mut session = session();
    session
        .mem_map(0x1000, 0x2000, Permission::ALL)
        .expect("map");
    session
        .mem_map(0x3000, 0x1000, Permission::READ)
        .expect("map");

    assert_eq!(
        session.mem_unmap(0x1000, 0x1000),
        Err(Error::Engine(ErrorCode::InvalidArgument))
    );
    assert_eq!(
        session.mem_unmap(0x1000, 0x4000),
        Err(Error::Engine(ErrorCode::MapNotFound))
    );
    assert_eq!(regions(&session).len(), 2);

    session.mem_unmap(0x1000, 0x3000).expect("unmap both");
    assert!(regions(&session).is_empty());
    assert_eq!(
        session.mem_unmap(0x1000, 0x1000),
        Err(Error::Engine(ErrorCode::MapNotFound))
    );
}

#[test]
fn protect_splits_regions_at_range_edges() {
    let mut session = session();
    session
        .mem_map(0x1000, 0x3000, Permission::ALL)
        .expect("map");
    session.mem_write(0x2000, &[0xAA; 4]).expect("seed");

    session
        .mem_protect(0x2000, 0x1000, Permission::READ)
        .expect("protect middle");
    assert_eq!(
        regions(&session),
        vec![
            (0x1000, 0x1FFF, Permission::ALL),
            (0x2000, 0x2FFF, Permission::READ),
            (0x3000, 0x3FFF, Permission::ALL),
        ]
    );

    let mut bytes = [0u8; 4];
    session.mem_read(0x2000, &mut bytes).expect("contents kept");
    assert_eq!(bytes, [0xAA; 4]);

    assert_eq!(
        session.mem_protect(0x3000, 0x2000, Permission::READ),
        Err(Error::Engine(ErrorCode::MapNotFound))
    );
}

#[test]
fn transfers_spanning_regions_are_all_or_nothing() {
    let mut session = session();
    session.mem_map(0x1000, PAGE, Permission::READ).expect("map");
    session.mem_map(0x2000, PAGE, Permission::NONE).expect("map");

    session
        .mem_write(0x1FFE, &[1, 2, 3, 4])
        .expect("spanning write ignores permissions");
    let mut bytes = [0u8; 4];
    session.mem_read(0x1FFE, &mut bytes).expect("spanning read");
    assert_eq!(bytes, [1, 2, 3, 4]);

    let mut tail = [0xEEu8; 4];
    assert_eq!(
        session.mem_read(0x2FFE, &mut tail),
        Err(Error::Engine(ErrorCode::ReadUnmapped))
    );
    assert_eq!(tail, [0xEE; 4]);

    assert_eq!(
        session.mem_write(0x2FFE, &[9, 9, 9, 9]),
        Err(Error::Engine(ErrorCode::WriteUnmapped))
    );
    session.mem_read(0x2FFE, &mut bytes[..2]).expect("head intact");
    assert_eq!(&bytes[..2], &[0, 0]);
}

#[test]
fn external_buffers_share_storage_and_survive_close() {
    let mut session = session();
    let buffer = ExternalBuffer::from_vec(vec![0x11; 0x2000]);
    session
        .mem_map_external(0x4000, 0x2000, Permission::READ | Permission::WRITE, buffer.clone())
        .expect("map external");

    session.mem_write(0x5000, &[0x22, 0x33]).expect("write");
    assert_eq!(&buffer.to_vec()[0x1000..0x1002], &[0x22, 0x33]);

    buffer.lock()[0] = 0x44;
    let mut first = [0u8; 1];
    session.mem_read(0x4000, &mut first).expect("read");
    assert_eq!(first, [0x44]);

    session
        .mem_protect(0x5000, 0x1000, Permission::READ)
        .expect("split external");
    session.mem_write(0x5002, &[0x55]).expect("write after split");
    assert_eq!(buffer.to_vec()[0x1002], 0x55);

    session.close();
    assert_eq!(buffer.handle_count(), 1);
    assert_eq!(buffer.to_vec()[0x1000], 0x22);
}

#[test]
fn external_guard_edits_keep_the_mapped_length() {
    let mut session = session();
    let buffer = ExternalBuffer::zeroed(0x1000);
    session
        .mem_map_external(0x1000, PAGE, Permission::READ, buffer.clone())
        .expect("map external");

    {
        let mut bytes = buffer.lock();
        bytes.fill(0x5A);
        bytes[0xFFF] = 0xA5;
    }
    assert_eq!(buffer.len(), 0x1000);

    let mut tail = [0u8; 4];
    session.mem_read(0x1FFC, &mut tail).expect("read to the last byte");
    assert_eq!(tail, [0x5A, 0x5A, 0x5A, 0xA5]);
}

#[test]
fn undersized_external_buffer_is_rejected() {
    let mut session = session();
    assert_eq!(
        session.mem_map_external(0, 0x2000, Permission::ALL, ExternalBuffer::zeroed(0x1000)),
        Err(Error::ExternalBufferTooSmall {
            len: 0x1000,
            size: 0x2000
        })
    );
}

#[test]
fn regions_are_snapshots() {
    let mut session = session();
    session.mem_map(0, PAGE, Permission::READ).expect("map");
    let before: Vec<Region> = session.mem_regions().expect("regions");
    session.mem_map(PAGE, PAGE, Permission::READ).expect("map");
    assert_eq!(before.len(), 1);
    assert_eq!(session.mem_regions().expect("regions").len(), 2);
}

proptest! {
    #[test]
    fn region_table_stays_sorted_and_disjoint(
        pages in proptest::collection::vec((0u64..16, 1u64..4), 1..12)
    ) {
        let mut session = session();
        for (page, count) in pages {
            // Overlaps are expected to fail; the table must stay consistent.
            let _ = session.mem_map(page * PAGE, count * PAGE, Permission::READ);
        }
        let table = session.mem_regions().expect("regions");
        for pair in table.windows(2) {
            prop_assert!(pair[0].end < pair[1].begin);
        }
        for region in &table {
            prop_assert_eq!(region.begin % PAGE, 0);
            prop_assert_eq!(region.size() % PAGE, 0);
        }
    }

    #[test]
    fn direct_writes_are_visible_to_reads(
        offset in 0u64..0x1F00,
        data in proptest::collection::vec(any::<u8>(), 1..256)
    ) {
        let mut session = session();
        session.mem_map(0x1000, 0x1000, Permission::NONE).expect("map");
        session.mem_map(0x2000, 0x1000, Permission::NONE).expect("map");
        let address = 0x1000 + offset;
        session.mem_write(address, &data).expect("write");
        let mut out = vec![0u8; data.len()];
        session.mem_read(address, &mut out).expect("read");
        prop_assert_eq!(out, data);
    }
}
