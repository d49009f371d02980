//! Property-based tests for volume framing: any damage to a signature or a
//! separator must surface as a corrupt volume, never as a readable archive.

use b1pack::header::{CatalogPointer, HeaderSet, HeaderType, SEPARATOR_BYTE, SIGNATURE_LEN};
use b1pack::volume::MemoryProvider;
use b1pack::writer::{ArchiveWriter, Content, WriterOptions};
use b1pack::ArchiveExplorer;
use proptest::prelude::*;
use std::io;

fn memory(_: u64) -> io::Result<Vec<u8>> {
    Ok(Vec::new())
}

/// Single-volume archive plus the offsets of its head separator and tail
/// separator.
fn archive(files: &[Vec<u8>], max_chunk_size: usize) -> (Vec<u8>, usize, usize) {
    let options = WriterOptions { max_chunk_size, ..WriterOptions::default() };
    let mut writer = ArchiveWriter::with_archive_id(memory, options, "prop-archive").unwrap();
    for (i, data) in files.iter().enumerate() {
        let content = if i % 2 == 0 {
            Content::from_bytes(data)
        } else {
            Content::streamed(&data[..])
        };
        writer.add_file(None, &format!("f{i}"), None, content).unwrap();
    }
    let written = writer.finish().unwrap();
    let bytes = written.volumes.into_iter().next().unwrap();
    let head_sep = written.catalog_pointer.offset as usize - 1;
    let tail = HeaderSet::tail(HeaderType::ArchiveEnd, Some(written.catalog_pointer)).to_string();
    let tail_sep = bytes.len() - SIGNATURE_LEN - tail.len() - 1;
    (bytes, head_sep, tail_sep)
}

/// Offsets of both signatures and both separators.
fn framing_offsets(len: usize, head_sep: usize, tail_sep: usize) -> Vec<usize> {
    let mut offsets: Vec<usize> = (0..SIGNATURE_LEN).collect();
    offsets.push(head_sep);
    offsets.push(tail_sep);
    offsets.extend(len - SIGNATURE_LEN..len);
    offsets
}

fn open(bytes: Vec<u8>) -> b1pack::Result<ArchiveExplorer<MemoryProvider>> {
    ArchiveExplorer::open(MemoryProvider::from_bytes("prop", vec![bytes]))
}

fn files_strategy() -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 1..5)
}

proptest! {
    #![proptest_config(ProptestConfig {
        failure_persistence: None,
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn flipped_framing_byte_is_corrupt_volume(
        files in files_strategy(),
        pick in any::<prop::sample::Index>(),
        mask in 1u8..=255,
    ) {
        let (mut bytes, head_sep, tail_sep) = archive(&files, 64);
        prop_assert!(open(bytes.clone()).is_ok());

        let offsets = framing_offsets(bytes.len(), head_sep, tail_sep);
        let at = offsets[pick.index(offsets.len())];
        bytes[at] ^= mask;
        match open(bytes) {
            Err(e) => prop_assert!(e.is_corrupt_volume(), "offset {}: {}", at, e),
            Ok(_) => prop_assert!(false, "flip at offset {} went unnoticed", at),
        }
    }

    #[test]
    fn removed_framing_byte_is_corrupt_volume(
        files in files_strategy(),
        pick in any::<prop::sample::Index>(),
    ) {
        let (mut bytes, head_sep, tail_sep) = archive(&files, 64);
        let offsets = framing_offsets(bytes.len(), head_sep, tail_sep);
        let at = offsets[pick.index(offsets.len())];
        bytes.remove(at);
        match open(bytes) {
            Err(e) => prop_assert!(e.is_corrupt_volume(), "offset {}: {}", at, e),
            Ok(_) => prop_assert!(false, "removal at offset {} went unnoticed", at),
        }
    }

    #[test]
    fn header_text_round_trips(
        archive_id in "[!-:<>-~]{1,40}",
        volume_number in 1u64..,
        pointer in proptest::option::of((1u64..1000, any::<u64>())),
        head in any::<bool>(),
    ) {
        let header_type = if head { HeaderType::head_for(volume_number) } else { HeaderType::VolumeEnd };
        let mut set = HeaderSet::head(header_type, &archive_id, volume_number).unwrap();
        if let Some((volume, offset)) = pointer {
            set.set_catalog_pointer(CatalogPointer::new(volume, offset));
        }
        let text = set.to_string();
        prop_assert!(!text.as_bytes().contains(&SEPARATOR_BYTE));
        let parsed: HeaderSet = text.parse().unwrap();
        prop_assert_eq!(parsed, set);
    }

    #[test]
    fn content_survives_either_framing(
        files in files_strategy(),
        max_chunk_size in 1usize..100,
    ) {
        let (bytes, _, _) = archive(&files, max_chunk_size);
        let mut explorer = open(bytes).unwrap();
        for (i, data) in files.iter().enumerate() {
            let id = i as u64 + 1;
            prop_assert_eq!(explorer.entry(id).unwrap().size(), Some(data.len() as u64));
            prop_assert_eq!(&explorer.read_file(id).unwrap(), data);
        }
    }
}
