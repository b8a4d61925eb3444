use std::{fs::File, io::Read, ops::Range, path::{Path, PathBuf}, str::FromStr};
use super::error::Error;

pub const PAGE_SIZE: u64 = 0x1000;

/// Snapshot of the target's mapping table, valid only for the instant it was
/// parsed. Take it while the target is frozen.
pub struct ProcessMap(Vec<MemoryMapping>);

impl ProcessMap {
    pub fn parse(pid: u32) -> Result<Self, Error> {
        let path = format!("/proc/{}/maps", pid);
        let mut content = String::new();
        File::open(&path)
            .and_then(|mut file| file.read_to_string(&mut content))
            .map_err(|error| Error::probe(error, &path))?;

        let mut mappings = Vec::new();
        for line in content.lines() {
            mappings.push(parse_line(line, &path)?);
        }
        Ok(ProcessMap(mappings))
    }

    pub fn mappings(&self) -> &[MemoryMapping] {
        &self.0
    }

    pub fn into_mappings(self) -> Vec<MemoryMapping> {
        self.0
    }

    /// Mappings carrying all of the requested permission bits. A `false`
    /// leaves that bit unconstrained.
    pub fn by_permissions(
        &self,
        read: bool,
        write: bool,
        exec: bool,
        backing: BackingFilter,
    ) -> Vec<&MemoryMapping> {
        self.0
            .iter()
            .filter(|m| {
                (!read || m.read())
                    && (!write || m.write())
                    && (!exec || m.exec())
                    && backing.matches(m)
            })
            .collect()
    }

    pub fn by_size(&self, size: u64, backing: BackingFilter) -> Vec<&MemoryMapping> {
        self.0
            .iter()
            .filter(|m| m.size() == size && backing.matches(m))
            .collect()
    }

    pub fn by_address(&self, addr: u64, backing: BackingFilter) -> Vec<&MemoryMapping> {
        self.0
            .iter()
            .filter(|m| m.range.contains(&addr) && backing.matches(m))
            .collect()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum BackingFilter {
    Any,
    FileOnly,
    AnonymousOnly,
}

impl BackingFilter {
    fn matches(&self, mapping: &MemoryMapping) -> bool {
        match self {
            BackingFilter::Any => true,
            BackingFilter::FileOnly => mapping.inode != 0,
            BackingFilter::AnonymousOnly => mapping.inode == 0,
        }
    }
}

#[derive(Clone)]
pub struct MemoryMapping {
    pub range: Range<u64>,
    pub perms: String,
    pub file_offset: u64,
    pub dev: String,
    pub inode: u64,
    pub backing: Backing,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backing {
    Anonymous,
    File(PathBuf),
    Remark(String),
}

impl MemoryMapping {
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }

    pub fn read(&self) -> bool {
        self.perms.contains('r')
    }

    pub fn write(&self) -> bool {
        self.perms.contains('w')
    }

    pub fn exec(&self) -> bool {
        self.perms.contains('x')
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File(path) => Some(path),
            _ => None,
        }
    }

    /// Virtual page numbers spanned by this mapping, end rounded up.
    pub fn vpn_range(&self) -> Range<u64> {
        (self.range.start / PAGE_SIZE)..((self.range.end + PAGE_SIZE - 1) / PAGE_SIZE)
    }

    pub fn pages(&self) -> usize {
        (self.vpn_range().end - self.vpn_range().start) as usize
    }
}

/// Merge overlapping views of the same file into one span, extending the
/// earlier mapping. Distinct mappings of one file otherwise produce the same
/// physical frames twice and double the probing work.
pub fn merge_file_overlaps(maps: Vec<MemoryMapping>) -> Vec<MemoryMapping> {
    let mut maps: Vec<Option<MemoryMapping>> = maps.into_iter().map(Some).collect();

    for first in 0..maps.len() {
        for second in 0..maps.len() {
            if first == second {
                continue;
            }
            let (a, b) = match (&maps[first], &maps[second]) {
                (Some(a), Some(b)) => (a, b),
                _ => continue,
            };
            if a.path() != b.path() || a.path().is_none() {
                continue;
            }
            if b.file_offset < a.file_offset {
                continue;
            }
            // `b` starts at or after `a` within the file
            if b.file_offset < a.file_offset + a.size() {
                let a_file_end = a.file_offset + a.size();
                let b_file_end = b.file_offset + b.size();
                if b_file_end > a_file_end {
                    let delta = b_file_end - a_file_end;
                    log::debug!(
                        "merging overlapping mappings of {:?} (+{:#x} bytes)",
                        a.path(),
                        delta,
                    );
                    maps[first].as_mut().unwrap().range.end += delta;
                }
                maps[second] = None;
            }
        }
    }

    maps.into_iter().flatten().collect()
}

fn parse_line(line: &str, path: &str) -> Result<MemoryMapping, Error> {
    let mut columns = line.split_ascii_whitespace();

    let range_str = columns
        .next()
        .ok_or_else(|| Error::malformed(path, "empty line"))?;
    let range = {
        let mut range_items = range_str.split('-');
        let start = range_items
            .next()
            .and_then(|s| u64::from_str_radix(s, 16).ok())
            .ok_or_else(|| Error::malformed(path, "bad range start"))?;
        let end = range_items
            .next()
            .and_then(|s| u64::from_str_radix(s, 16).ok())
            .ok_or_else(|| Error::malformed(path, "bad range end"))?;
        start..end
    };

    let perms = columns
        .next()
        .ok_or_else(|| Error::malformed(path, "missing perms"))?
        .to_string();

    let file_offset = columns
        .next()
        .and_then(|s| u64::from_str_radix(s, 16).ok())
        .ok_or_else(|| Error::malformed(path, "bad offset"))?;

    let dev = columns
        .next()
        .ok_or_else(|| Error::malformed(path, "missing dev"))?
        .to_string();

    let inode = columns
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::malformed(path, "bad inode"))?;

    let backing = match columns.next() {
        None => Backing::Anonymous,
        Some(name) if name.starts_with('[') => Backing::Remark(name.to_string()),
        Some(name) => Backing::File(PathBuf::from(name)),
    };

    Ok(MemoryMapping {
        range,
        perms,
        file_offset,
        dev,
        inode,
        backing,
    })
}

impl FromStr for MemoryMapping {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_line(s, "maps")
    }
}

#[cfg(test)]
mod tests {
    use super::{merge_file_overlaps, Backing, MemoryMapping, PAGE_SIZE};

    fn parse(line: &str) -> MemoryMapping {
        line.parse().unwrap()
    }

    #[test]
    fn file_backed_line() {
        let m = parse("7f5a8c000000-7f5a8c023000 r-xp 00002000 08:01 1835017 /usr/lib/libc.so.6");
        assert_eq!(m.range, 0x7f5a_8c00_0000..0x7f5a_8c02_3000);
        assert!(m.read() && m.exec() && !m.write());
        assert_eq!(m.file_offset, 0x2000);
        assert_eq!(m.inode, 1835017);
        assert_eq!(m.path().unwrap().to_str(), Some("/usr/lib/libc.so.6"));
        assert_eq!(m.pages(), 0x23);
    }

    #[test]
    fn anonymous_and_remark_lines() {
        let m = parse("7f5a8c023000-7f5a8c025000 rw-p 00000000 00:00 0");
        assert_eq!(m.backing, Backing::Anonymous);

        let m = parse("5645a3b00000-5645a3b21000 rw-p 00000000 00:00 0 [heap]");
        assert_eq!(m.backing, Backing::Remark("[heap]".to_string()));
        assert!(m.path().is_none());
    }

    #[test]
    fn malformed_line_fails_fast() {
        assert!("not a mapping".parse::<MemoryMapping>().is_err());
        assert!("7f5a-zzzz r-xp 0 08:01 5 /lib".parse::<MemoryMapping>().is_err());
    }

    #[test]
    fn unaligned_end_rounds_up() {
        let m = parse("1000-2800 r--p 00000000 08:01 5 /bin/true");
        assert_eq!(m.pages(), 2);
        assert_eq!(m.vpn_range(), 1..3);
    }

    #[test]
    fn overlap_merge() {
        let a = parse("1000-3000 r--p 00000000 08:01 5 /bin/true");
        let b = parse("10000-13000 r--p 00001000 08:01 5 /bin/true");
        let c = parse("20000-21000 r--p 00000000 08:01 7 /bin/false");

        let merged = merge_file_overlaps(vec![a, b, c]);
        assert_eq!(merged.len(), 2);
        // [0x0000, 0x2000) and [0x1000, 0x4000) of /bin/true fold into one
        // span of 4 pages
        assert_eq!(merged[0].size() / PAGE_SIZE, 4);
        assert_eq!(merged[1].path().unwrap().to_str(), Some("/bin/false"));
    }

    #[test]
    fn disjoint_mappings_stay_apart() {
        let a = parse("1000-2000 r--p 00000000 08:01 5 /bin/true");
        let b = parse("10000-11000 r--p 00005000 08:01 5 /bin/true");
        assert_eq!(merge_file_overlaps(vec![a, b]).len(), 2);
    }
}
