use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
};
use super::error::Error;

// /proc/<pid>/pagemap record, one 8-byte little-endian word per virtual page
// (Documentation/admin-guide/mm/pagemap.rst)
const PFN_SWAP_MASK: u64 = (1 << 55) - 1;
const SOFT_DIRTY_BIT: u64 = 1 << 55;
const EXCLUSIVE_BIT: u64 = 1 << 56;
const FILE_SHARED_BIT: u64 = 1 << 61;
const SWAPPED_BIT: u64 = 1 << 62;
const PRESENT_BIT: u64 = 1 << 63;

// /proc/kpageflags word, indexed by frame number
const KPF_KSM: u64 = 1 << 21;

const KPAGEFLAGS_PATH: &str = "/proc/kpageflags";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageTableEntry {
    raw: u64,
}

impl PageTableEntry {
    pub fn from_raw(raw: u64) -> Self {
        PageTableEntry { raw }
    }

    pub fn present(&self) -> bool {
        self.raw & PRESENT_BIT != 0
    }

    pub fn swapped(&self) -> bool {
        self.raw & SWAPPED_BIT != 0
    }

    pub fn file_shared(&self) -> bool {
        self.raw & FILE_SHARED_BIT != 0
    }

    pub fn exclusive(&self) -> bool {
        self.raw & EXCLUSIVE_BIT != 0
    }

    pub fn soft_dirty(&self) -> bool {
        self.raw & SOFT_DIRTY_BIT != 0
    }

    /// Physical frame number, only meaningful while the page is present.
    pub fn frame(&self) -> Option<u64> {
        if self.present() {
            Some(self.raw & PFN_SWAP_MASK)
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KernelPageFlags(pub u64);

impl KernelPageFlags {
    /// Frame is deduplicated by kernel samepage merging, diagnostic only.
    pub fn ksm(&self) -> bool {
        self.0 & KPF_KSM != 0
    }
}

/// Resolves virtual pages of one process to physical frames and kernel flags.
/// Holds both pseudo-file descriptors for its whole lifetime.
pub struct PageMapReader {
    pid: u32,
    pagemap: File,
    kpageflags: File,
}

impl PageMapReader {
    pub fn new(pid: u32) -> Result<Self, Error> {
        let path = format!("/proc/{}/pagemap", pid);
        let pagemap = File::open(&path).map_err(|error| Error::probe(error, &path))?;
        let kpageflags = File::open(KPAGEFLAGS_PATH)
            .map_err(|error| Error::from_io(error, KPAGEFLAGS_PATH))?;
        Ok(PageMapReader {
            pid,
            pagemap,
            kpageflags,
        })
    }

    /// Decode the record for one virtual page. Flags are fetched only for
    /// present pages; a page that is not present reports flags 0.
    pub fn resolve(&mut self, vpn: u64) -> Result<(PageTableEntry, KernelPageFlags), Error> {
        // record offsets are plain u64 here, vpns in the upper half of a
        // 64-bit address space seek correctly without sign juggling
        let entry = PageTableEntry::from_raw(self.read_record(vpn)?);

        let flags = match entry.frame() {
            Some(frame) => KernelPageFlags(self.read_flags(frame)?),
            None => KernelPageFlags(0),
        };
        Ok((entry, flags))
    }

    fn read_record(&mut self, vpn: u64) -> Result<u64, Error> {
        let path = format!("/proc/{}/pagemap", self.pid);
        let mut buf = [0; 8];
        self.pagemap
            .seek(SeekFrom::Start(vpn * 8))
            .and_then(|_| self.pagemap.read_exact(&mut buf))
            .map_err(|error| match error.kind() {
                std::io::ErrorKind::UnexpectedEof => {
                    Error::malformed(&path, "record past end of pagemap")
                },
                _ => Error::probe(error, &path),
            })?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_flags(&mut self, frame: u64) -> Result<u64, Error> {
        let mut buf = [0; 8];
        self.kpageflags
            .seek(SeekFrom::Start(frame * 8))
            .and_then(|_| self.kpageflags.read_exact(&mut buf))
            .map_err(|error| Error::from_io(error, KPAGEFLAGS_PATH))?;
        Ok(u64::from_le_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::{KernelPageFlags, PageTableEntry};

    #[test]
    fn present_entry() {
        let entry = PageTableEntry::from_raw((1 << 63) | (1 << 56) | 0x1a2b3c);
        assert!(entry.present());
        assert!(entry.exclusive());
        assert!(!entry.swapped());
        assert_eq!(entry.frame(), Some(0x1a2b3c));
    }

    #[test]
    fn absent_entry_has_no_frame() {
        let entry = PageTableEntry::from_raw(0);
        assert!(!entry.present());
        assert_eq!(entry.frame(), None);

        // swap entries keep their swap payload out of the frame accessor
        let entry = PageTableEntry::from_raw((1 << 62) | 0x77);
        assert!(entry.swapped());
        assert_eq!(entry.frame(), None);
    }

    #[test]
    fn flag_bits() {
        let entry = PageTableEntry::from_raw((1 << 63) | (1 << 61) | (1 << 55) | 5);
        assert!(entry.file_shared());
        assert!(entry.soft_dirty());
        assert!(!entry.exclusive());

        assert!(KernelPageFlags(1 << 21).ksm());
        assert!(!KernelPageFlags(1 << 20).ksm());
    }

    #[test]
    fn frame_mask_is_55_bits() {
        let entry = PageTableEntry::from_raw(u64::MAX);
        assert_eq!(entry.frame(), Some((1 << 55) - 1));
    }
}
