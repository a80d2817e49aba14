use redo_common::{empty_page, Page, PageId, RedoRecord, StorageError, PAGE_SIZE};

/// Materialize a page by replaying a chain of redo records onto a zeroed page.
///
/// Records must be supplied in the order they were appended to the log.
/// Each record writes its `data` at the specified `offset` within the page.
pub fn materialize_page(page_id: PageId, records: &[RedoRecord]) -> Result<Page, StorageError> {
    let mut page = empty_page();

    for record in records {
        debug_assert_eq!(record.page_id, page_id);
        apply_redo(&mut page, record)?;
    }

    Ok(page)
}

/// Apply a single redo record to a page image.
fn apply_redo(page: &mut Page, record: &RedoRecord) -> Result<(), StorageError> {
    let start = record.offset as usize;
    let end = start + record.data.len();

    if end > PAGE_SIZE {
        return Err(StorageError::PageOverflow { offset: record.offset, len: record.data.len() });
    }

    page[start..end].copy_from_slice(&record.data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_redo(page_id: PageId, offset: u16, data: Vec<u8>, is_group_end: bool) -> RedoRecord {
        RedoRecord { page_id, offset, data, mtr_id: 1, is_group_end }
    }

    #[test]
    fn single_record() {
        let records = vec![make_redo(1, 0, vec![0xAA, 0xBB, 0xCC], true)];
        let page = materialize_page(1, &records).unwrap();
        assert_eq!(page[0], 0xAA);
        assert_eq!(page[1], 0xBB);
        assert_eq!(page[2], 0xCC);
        assert_eq!(page[3], 0x00); // rest is zero
    }

    #[test]
    fn multiple_records_compose_in_order() {
        let records = vec![
            make_redo(1, 0, vec![0x11, 0x22], false),
            make_redo(1, 4, vec![0x33, 0x44], false),
            make_redo(1, 0, vec![0xFF], true), // overwrites first byte
        ];
        let page = materialize_page(1, &records).unwrap();
        assert_eq!(page[0], 0xFF); // overwritten
        assert_eq!(page[1], 0x22); // from first record
        assert_eq!(page[4], 0x33);
        assert_eq!(page[5], 0x44);
    }

    #[test]
    fn write_at_end_of_page() {
        let records = vec![make_redo(1, (PAGE_SIZE - 2) as u16, vec![0xEE, 0xFF], true)];
        let page = materialize_page(1, &records).unwrap();
        assert_eq!(page[PAGE_SIZE - 2], 0xEE);
        assert_eq!(page[PAGE_SIZE - 1], 0xFF);
    }

    #[test]
    fn overflow_rejected() {
        let records = vec![make_redo(1, (PAGE_SIZE - 1) as u16, vec![0xAA, 0xBB], true)];
        let result = materialize_page(1, &records);
        assert!(result.is_err());
    }

    #[test]
    fn empty_chain_returns_zeroed_page() {
        let page = materialize_page(1, &[]).unwrap();
        assert_eq!(page, empty_page());
    }
}
