//! Raw ZIP layout of an APK
//!
//! Entries are read through [`zip::ZipArchive`]. The signing engine copies
//! their compressed data verbatim, so it also keeps the byte ranges of the
//! data, the central directory, the end of central directory record and,
//! if present, the APK Signing Block in front of the central directory.

use std::io::{Cursor, Read, Write};
use std::ops::Range;

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};
use zip::result::ZipError;
use zip::{CompressionMethod, ZipArchive};

use crate::error::{Result, SigningError};

const LOCAL_HEADER_SIG: u32 = 0x04034b50;
const CENTRAL_HEADER_SIG: u32 = 0x02014b50;
const EOCD_SIG: u32 = 0x06054b50;
const LOCAL_HEADER_LEN: usize = 30;
const EOCD_LEN: usize = 22;
/// Offset of the central directory offset field inside the EOCD record
const EOCD_CD_OFFSET_FIELD: usize = 16;

/// Trailing magic of an APK Signing Block
pub(crate) const SIGNING_BLOCK_MAGIC: &[u8; 16] = b"APK Sig Block 42";

/// Extra field zipalign-compatible tools use to pad stored entries
const ALIGNMENT_EXTRA_ID: u16 = 0xd935;
const DATA_DESCRIPTOR_FLAG: u16 = 0x0008;
const UTF8_FLAG: u16 = 0x0800;

pub(crate) const METHOD_STORED: u16 = 0;
pub(crate) const METHOD_DEFLATED: u16 = 8;

/// Version made by for entries carrying unix permissions, and for the rest
const UNIX_VERSION_MADE_BY: u16 = (3 << 8) | 20;
const DEFAULT_VERSION: u16 = 20;

/// DOS timestamp written on generated entries (2009-01-01 00:00)
const GENERATED_DOS_DATE: u16 = 0x3a21;
const GENERATED_DOS_TIME: u16 = 0;

fn invalid(message: impl Into<String>) -> SigningError {
    SigningError::InvalidApk(message.into())
}

pub(crate) fn u16_at(buf: &[u8], offset: usize) -> Result<u16> {
    offset
        .checked_add(2)
        .and_then(|end| buf.get(offset..end))
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| invalid(format!("truncated at offset {offset}")))
}

pub(crate) fn u32_at(buf: &[u8], offset: usize) -> Result<u32> {
    offset
        .checked_add(4)
        .and_then(|end| buf.get(offset..end))
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| invalid(format!("truncated at offset {offset}")))
}

pub(crate) fn u64_at(buf: &[u8], offset: usize) -> Result<u64> {
    offset
        .checked_add(8)
        .and_then(|end| buf.get(offset..end))
        .map(|b| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(b);
            u64::from_le_bytes(bytes)
        })
        .ok_or_else(|| invalid(format!("truncated at offset {offset}")))
}

/// One entry, as described by its central directory record
#[derive(Debug, Clone)]
pub(crate) struct ZipEntry {
    pub name: Vec<u8>,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub central_extra: Vec<u8>,
    pub comment: Vec<u8>,
    pub external_attrs: u32,
    pub local_extra: Vec<u8>,
    pub data: Range<usize>,
}

impl ZipEntry {
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    pub fn is_directory(&self) -> bool {
        self.name.ends_with(b"/")
    }

    /// Uncompressed content
    pub fn content(&self, apk: &[u8]) -> Result<Vec<u8>> {
        let raw = &apk[self.data.clone()];
        match self.method {
            METHOD_STORED => Ok(raw.to_vec()),
            METHOD_DEFLATED => {
                let mut out = Vec::with_capacity(self.uncompressed_size as usize);
                DeflateDecoder::new(raw)
                    .read_to_end(&mut out)
                    .map_err(|e| invalid(format!("{}: {e}", self.name_lossy())))?;
                Ok(out)
            }
            other => Err(invalid(format!(
                "{}: unsupported compression method {other}",
                self.name_lossy()
            ))),
        }
    }
}

/// Parsed layout of a whole archive
#[derive(Debug)]
pub(crate) struct ZipLayout {
    pub entries: Vec<ZipEntry>,
    /// Start of the APK Signing Block, or of the central directory if there is none
    pub entries_end: usize,
    pub central_directory: Range<usize>,
    pub eocd_offset: usize,
    pub signing_block: Option<Range<usize>>,
    pub comment: Vec<u8>,
}

impl ZipLayout {
    pub fn parse(apk: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(apk)).map_err(not_a_zip)?;
        let comment = archive.comment().to_vec();

        let eocd_offset = apk
            .len()
            .checked_sub(EOCD_LEN + comment.len())
            .filter(|&offset| u32_at(apk, offset).ok() == Some(EOCD_SIG))
            .ok_or_else(|| invalid("end of central directory record not found"))?;
        let cd_size = u32_at(apk, eocd_offset + 12)? as usize;
        let cd_offset = u32_at(apk, eocd_offset + EOCD_CD_OFFSET_FIELD)?;
        if cd_offset == u32::MAX {
            return Err(invalid("ZIP64 archives are not supported"));
        }
        let cd_offset = cd_offset as usize;
        if cd_offset.checked_add(cd_size) != Some(eocd_offset) {
            return Err(invalid("central directory is not followed by its end record"));
        }

        let signing_block = find_signing_block(apk, cd_offset)?;
        let entries_end = signing_block.as_ref().map_or(cd_offset, |b| b.start);

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let file = archive.by_index_raw(index).map_err(not_a_zip)?;
            let name = file.name_raw().to_vec();
            let name_lossy = String::from_utf8_lossy(&name).into_owned();
            let method = match file.compression() {
                CompressionMethod::Stored => METHOD_STORED,
                CompressionMethod::Deflated => METHOD_DEFLATED,
                other => {
                    return Err(invalid(format!(
                        "{name_lossy}: unsupported compression method {other:?}"
                    )))
                }
            };

            let header_start = to_offset(file.header_start())?;
            let data_start = to_offset(file.data_start())?;
            let compressed_size = size_u32(to_offset(file.compressed_size())?)?;
            let data_end = data_start
                .checked_add(compressed_size as usize)
                .filter(|&end| end <= entries_end)
                .ok_or_else(|| invalid(format!("{name_lossy}: data overlaps the central directory")))?;

            let local_name_len = u16_at(apk, header_start + 26)? as usize;
            let local_extra = apk
                .get(header_start + LOCAL_HEADER_LEN + local_name_len..data_start)
                .ok_or_else(|| invalid(format!("{name_lossy}: bad local header")))?
                .to_vec();
            let (mod_date, mod_time) = file
                .last_modified()
                .map_or((GENERATED_DOS_DATE, GENERATED_DOS_TIME), |t| {
                    (t.datepart(), t.timepart())
                });
            let (version_made_by, external_attrs) = match file.unix_mode() {
                Some(mode) => (UNIX_VERSION_MADE_BY, mode << 16),
                None => (DEFAULT_VERSION, 0),
            };

            entries.push(ZipEntry {
                version_needed: u16_at(apk, header_start + 4)?,
                flags: u16_at(apk, header_start + 6)?,
                method,
                mod_time,
                mod_date,
                crc32: file.crc32(),
                compressed_size,
                uncompressed_size: size_u32(to_offset(file.size())?)?,
                central_extra: file.extra_data().unwrap_or_default().to_vec(),
                comment: file.comment().as_bytes().to_vec(),
                version_made_by,
                external_attrs,
                local_extra,
                data: data_start..data_end,
                name,
            });
        }

        Ok(Self {
            entries,
            entries_end,
            central_directory: cd_offset..eocd_offset,
            eocd_offset,
            signing_block,
            comment,
        })
    }
}

fn not_a_zip(err: ZipError) -> SigningError {
    invalid(format!("not a readable ZIP archive: {err}"))
}

fn to_offset(value: u64) -> Result<usize> {
    usize::try_from(value).map_err(|_| invalid("archive too large"))
}

/// The APK Signing Block ending at `cd_offset`, if there is one
pub(crate) fn find_signing_block(apk: &[u8], cd_offset: usize) -> Result<Option<Range<usize>>> {
    if cd_offset < 32 || apk.get(cd_offset - 16..cd_offset) != Some(&SIGNING_BLOCK_MAGIC[..]) {
        return Ok(None);
    }
    let out_of_range = || invalid("APK Signing Block size out of range");
    let footer_size = usize::try_from(u64_at(apk, cd_offset - 24)?).map_err(|_| out_of_range())?;
    if footer_size < 24 {
        return Err(out_of_range());
    }
    let start = footer_size
        .checked_add(8)
        .and_then(|total| cd_offset.checked_sub(total))
        .ok_or_else(out_of_range)?;
    if u64_at(apk, start)? != footer_size as u64 {
        return Err(invalid("APK Signing Block header and footer sizes differ"));
    }
    Ok(Some(start..cd_offset))
}

/// Extra field records other than alignment padding.
///
/// Stops at the first malformed record, which is how padding left by other
/// aligners looks.
fn strip_alignment(extra: &[u8]) -> Vec<u8> {
    let mut kept = Vec::with_capacity(extra.len());
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let id = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
        let len = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
        let end = pos + 4 + len;
        if end > extra.len() {
            break;
        }
        if id != ALIGNMENT_EXTRA_ID && id != 0 {
            kept.extend_from_slice(&extra[pos..end]);
        }
        pos = end;
    }
    kept
}

/// Alignment of a stored entry's data: page size for shared libraries so
/// they can be mapped directly, 4 bytes otherwise
fn alignment_for(name: &[u8]) -> usize {
    if name.ends_with(b".so") {
        4096
    } else {
        4
    }
}

/// The three sections of a written archive
#[derive(Debug)]
pub(crate) struct ZipSections {
    pub entries: Vec<u8>,
    pub central_directory: Vec<u8>,
    pub eocd: Vec<u8>,
}

impl ZipSections {
    /// The whole archive, with an optional APK Signing Block inserted in
    /// front of the central directory
    pub fn assemble(mut self, signing_block: Option<&[u8]>) -> Result<Vec<u8>> {
        let block = signing_block.unwrap_or_default();
        let cd_offset = u32::try_from(self.entries.len() + block.len())
            .map_err(|_| invalid("archive too large"))?;
        self.eocd[EOCD_CD_OFFSET_FIELD..EOCD_CD_OFFSET_FIELD + 4]
            .copy_from_slice(&cd_offset.to_le_bytes());

        let mut out = self.entries;
        out.extend_from_slice(block);
        out.extend_from_slice(&self.central_directory);
        out.extend_from_slice(&self.eocd);
        Ok(out)
    }
}

struct Header<'a> {
    version_needed: u16,
    flags: u16,
    method: u16,
    mod_time: u16,
    mod_date: u16,
    crc32: u32,
    compressed_size: u32,
    uncompressed_size: u32,
    name: &'a [u8],
}

/// Writes a new archive entry by entry
#[derive(Default)]
pub(crate) struct ZipBuilder {
    entries: Vec<u8>,
    central_directory: Vec<u8>,
    count: usize,
}

impl ZipBuilder {
    /// Copy an entry's compressed data unchanged, re-aligning stored data
    pub fn copy_entry(&mut self, apk: &[u8], entry: &ZipEntry) -> Result<()> {
        let offset = self.offset()?;
        let header = Header {
            version_needed: entry.version_needed,
            flags: entry.flags & !DATA_DESCRIPTOR_FLAG,
            method: entry.method,
            mod_time: entry.mod_time,
            mod_date: entry.mod_date,
            crc32: entry.crc32,
            compressed_size: entry.compressed_size,
            uncompressed_size: entry.uncompressed_size,
            name: &entry.name,
        };

        let mut local_extra = strip_alignment(&entry.local_extra);
        if entry.method == METHOD_STORED {
            let alignment = alignment_for(&entry.name);
            let unpadded = offset + LOCAL_HEADER_LEN + entry.name.len() + local_extra.len() + 6;
            let padding = (alignment - unpadded % alignment) % alignment;
            local_extra.extend_from_slice(&ALIGNMENT_EXTRA_ID.to_le_bytes());
            local_extra.extend_from_slice(&((2 + padding) as u16).to_le_bytes());
            local_extra.extend_from_slice(&(alignment as u16).to_le_bytes());
            local_extra.resize(local_extra.len() + padding, 0);
        }

        self.write_local(&header, &local_extra, &apk[entry.data.clone()])?;
        self.write_central(
            &header,
            offset,
            entry.version_made_by,
            &entry.central_extra,
            &entry.comment,
            entry.external_attrs,
        )
    }

    /// Add a new deflated entry
    pub fn add_deflated(&mut self, name: &str, content: &[u8]) -> Result<()> {
        let offset = self.offset()?;
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content)?;
        let compressed = encoder.finish()?;
        let mut crc = Crc::new();
        crc.update(content);

        let header = Header {
            version_needed: 20,
            flags: if name.is_ascii() { 0 } else { UTF8_FLAG },
            method: METHOD_DEFLATED,
            mod_time: GENERATED_DOS_TIME,
            mod_date: GENERATED_DOS_DATE,
            crc32: crc.sum(),
            compressed_size: size_u32(compressed.len())?,
            uncompressed_size: size_u32(content.len())?,
            name: name.as_bytes(),
        };
        self.write_local(&header, &[], &compressed)?;
        self.write_central(&header, offset, DEFAULT_VERSION, &[], &[], 0)
    }

    /// Finish the archive with the given comment
    pub fn finish(self, comment: &[u8]) -> Result<ZipSections> {
        let count = u16::try_from(self.count).map_err(|_| invalid("too many entries"))?;
        let cd_size = size_u32(self.central_directory.len())?;
        let cd_offset = size_u32(self.entries.len())?;
        let comment_len = u16::try_from(comment.len()).map_err(|_| invalid("comment too long"))?;

        let mut eocd = Vec::with_capacity(EOCD_LEN + comment.len());
        eocd.extend_from_slice(&EOCD_SIG.to_le_bytes());
        eocd.extend_from_slice(&0u16.to_le_bytes());
        eocd.extend_from_slice(&0u16.to_le_bytes());
        eocd.extend_from_slice(&count.to_le_bytes());
        eocd.extend_from_slice(&count.to_le_bytes());
        eocd.extend_from_slice(&cd_size.to_le_bytes());
        eocd.extend_from_slice(&cd_offset.to_le_bytes());
        eocd.extend_from_slice(&comment_len.to_le_bytes());
        eocd.extend_from_slice(comment);

        Ok(ZipSections {
            entries: self.entries,
            central_directory: self.central_directory,
            eocd,
        })
    }

    fn offset(&self) -> Result<usize> {
        size_u32(self.entries.len()).map(|o| o as usize)
    }

    fn write_local(&mut self, header: &Header<'_>, extra: &[u8], data: &[u8]) -> Result<()> {
        let out = &mut self.entries;
        out.extend_from_slice(&LOCAL_HEADER_SIG.to_le_bytes());
        out.extend_from_slice(&header.version_needed.to_le_bytes());
        out.extend_from_slice(&header.flags.to_le_bytes());
        out.extend_from_slice(&header.method.to_le_bytes());
        out.extend_from_slice(&header.mod_time.to_le_bytes());
        out.extend_from_slice(&header.mod_date.to_le_bytes());
        out.extend_from_slice(&header.crc32.to_le_bytes());
        out.extend_from_slice(&header.compressed_size.to_le_bytes());
        out.extend_from_slice(&header.uncompressed_size.to_le_bytes());
        out.extend_from_slice(&len_u16(header.name.len())?.to_le_bytes());
        out.extend_from_slice(&len_u16(extra.len())?.to_le_bytes());
        out.extend_from_slice(header.name);
        out.extend_from_slice(extra);
        out.extend_from_slice(data);
        Ok(())
    }

    fn write_central(
        &mut self,
        header: &Header<'_>,
        local_offset: usize,
        version_made_by: u16,
        extra: &[u8],
        comment: &[u8],
        external_attrs: u32,
    ) -> Result<()> {
        let out = &mut self.central_directory;
        out.extend_from_slice(&CENTRAL_HEADER_SIG.to_le_bytes());
        out.extend_from_slice(&version_made_by.to_le_bytes());
        out.extend_from_slice(&header.version_needed.to_le_bytes());
        out.extend_from_slice(&header.flags.to_le_bytes());
        out.extend_from_slice(&header.method.to_le_bytes());
        out.extend_from_slice(&header.mod_time.to_le_bytes());
        out.extend_from_slice(&header.mod_date.to_le_bytes());
        out.extend_from_slice(&header.crc32.to_le_bytes());
        out.extend_from_slice(&header.compressed_size.to_le_bytes());
        out.extend_from_slice(&header.uncompressed_size.to_le_bytes());
        out.extend_from_slice(&len_u16(header.name.len())?.to_le_bytes());
        out.extend_from_slice(&len_u16(extra.len())?.to_le_bytes());
        out.extend_from_slice(&len_u16(comment.len())?.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&external_attrs.to_le_bytes());
        out.extend_from_slice(&size_u32(local_offset)?.to_le_bytes());
        out.extend_from_slice(header.name);
        out.extend_from_slice(extra);
        out.extend_from_slice(comment);
        self.count += 1;
        Ok(())
    }
}

fn size_u32(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| invalid("archive too large"))
}

fn len_u16(len: usize) -> Result<u16> {
    u16::try_from(len).map_err(|_| invalid("header field too long"))
}
