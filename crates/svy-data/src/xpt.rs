//! SAS Transport v5 (.xpt / MEPS `.ssp`) reader and writer.
//!
//! MEPS public-use files ship as SAS transport members inside zip archives.
//! A file is a stream of 80-byte records: a library header, then per member
//! a header block, one 140-byte namestr per variable and the observations,
//! each block blank-padded to a multiple of 80. Numerics are IBM 370 hex
//! floats, big-endian.
//!
//! Reference: <https://support.sas.com/techsup/technote/ts140.pdf>
//!
//! Full-year consolidated files carry well over a thousand variables, so the
//! reader can keep a subset of columns while decoding observations.

use std::path::Path;

use svy_core::{Error, Result};

/// One member (dataset) of a transport file.
#[derive(Debug, Clone)]
pub struct XptDataset {
    /// Member name, up to 8 characters.
    pub name: String,
    /// Member label, up to 40 characters.
    pub label: String,
    /// Kept variables, in file order.
    pub variables: Vec<XptVariable>,
    /// `data[row][col]`, columns aligned with `variables`.
    pub data: Vec<Vec<XptValue>>,
}

/// Variable metadata from one namestr record.
#[derive(Debug, Clone)]
pub struct XptVariable {
    /// Upper-case name, up to 8 characters.
    pub name: String,
    /// Variable label.
    pub label: String,
    /// Numeric or character.
    pub var_type: XptVarType,
    /// Bytes per observation: 2-8 for numerics, 1-200 for text.
    pub length: usize,
    /// SAS display format, e.g. `$10.`.
    pub format: String,
}

impl XptVariable {
    /// An 8-byte numeric without a display format.
    pub fn numeric(name: &str, label: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            var_type: XptVarType::Numeric,
            length: 8,
            format: String::new(),
        }
    }

    /// A character variable of `length` bytes, formatted `$<length>.`.
    pub fn character(name: &str, label: &str, length: usize) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            var_type: XptVarType::Character,
            length,
            format: format!("${length}."),
        }
    }

    fn is_writable(&self) -> bool {
        let width_ok = match self.var_type {
            XptVarType::Numeric => (2..=8).contains(&self.length),
            XptVarType::Character => (1..=200).contains(&self.length),
        };
        width_ok && (1..=8).contains(&self.name.len())
    }
}

/// Storage type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XptVarType {
    /// IBM 370 float.
    Numeric,
    /// Blank-padded text.
    Character,
}

/// One decoded cell.
#[derive(Debug, Clone, PartialEq)]
pub enum XptValue {
    /// A present numeric value.
    Numeric(f64),
    /// Any SAS missing code (`.`, `._`, `.A` to `.Z`).
    Missing,
    /// Trailing blanks removed.
    Character(String),
}

/// Reader settings.
#[derive(Debug, Clone, Default)]
pub struct XptReadOptions {
    /// Variables to keep, matched case-insensitively; `None` keeps all.
    pub columns: Option<Vec<String>>,
}

/// `2^k` for `k` in the normal exponent range.
fn pow2(k: i32) -> f64 {
    f64::from_bits(((k + 1023) as u64) << 52)
}

/// Decode an IBM 370 double, `(-1)^s * 0.f * 16^(e - 64)` with a 56-bit
/// fraction. A zero fraction under a non-zero leading byte is a SAS missing
/// code and gives `None`.
pub fn ibm_to_ieee(bytes: [u8; 8]) -> Option<f64> {
    let fraction = u64::from_be_bytes(bytes) & 0x00ff_ffff_ffff_ffff;
    if fraction == 0 {
        return (bytes[0] == 0).then_some(0.0);
    }
    let exponent = i32::from(bytes[0] & 0x7f) - 64;
    // 56 bits round to the nearest double here; the power of two is exact.
    let magnitude = fraction as f64 * pow2(4 * exponent - 56);
    Some(if bytes[0] & 0x80 != 0 { -magnitude } else { magnitude })
}

/// Encode an IEEE double as IBM 370. Non-finite values and magnitudes IBM
/// cannot hold become the standard missing code.
pub fn ieee_to_ibm(value: f64) -> [u8; 8] {
    if !value.is_finite() {
        return missing_to_ibm();
    }
    if value == 0.0 {
        return [0; 8];
    }
    let bits = value.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i32;
    // |value| = m * 2^e with m an integer of at most 53 bits.
    let (m, e) = match biased {
        0 => (bits & 0x000f_ffff_ffff_ffff, -1074),
        _ => ((bits & 0x000f_ffff_ffff_ffff) | (1 << 52), biased - 1075),
    };
    let top = (64 - m.leading_zeros()) as i32 + e;
    // Smallest hex exponent with |value| < 16^hex; the fraction then needs a
    // left shift of 0-3 bits, so nothing is lost.
    let hex = (top + 3).div_euclid(4);
    let stored = hex + 64;
    if !(0..=127).contains(&stored) {
        return missing_to_ibm();
    }
    let fraction = m << (e + 56 - 4 * hex);
    let sign = if value < 0.0 { 0x80u8 } else { 0 };
    let mut out = fraction.to_be_bytes();
    out[0] = sign | stored as u8;
    out
}

/// The plain `.` missing code.
pub fn missing_to_ibm() -> [u8; 8] {
    [b'.', 0, 0, 0, 0, 0, 0, 0]
}

const RECORD: usize = 80;
const NAMESTR: usize = 140;
const HEADER_LEAD: &[u8] = b"HEADER RECORD*******";

/// Creation and modification stamp; fixed so output is reproducible.
const STAMP: &[u8] = b"01JAN21:00:00:00";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Header {
    Library,
    Member,
    Descriptor,
    Namestr,
    Observations,
}

impl Header {
    fn tag(self) -> &'static [u8; 7] {
        match self {
            Header::Library => b"LIBRARY",
            Header::Member => b"MEMBER ",
            Header::Descriptor => b"DSCRPTR",
            Header::Namestr => b"NAMESTR",
            Header::Observations => b"OBS    ",
        }
    }

    fn is(self, record: &[u8]) -> bool {
        record.starts_with(HEADER_LEAD) && record[HEADER_LEAD.len()..].starts_with(self.tag())
    }

    /// Full header record with `digits` after the `!!!!!!!` run.
    fn record(self, digits: &str) -> [u8; RECORD] {
        let mut rec = [b' '; RECORD];
        let mut at = 0;
        let parts: [&[u8]; 4] = [HEADER_LEAD, self.tag(), b" HEADER RECORD!!!!!!!", digits.as_bytes()];
        for part in parts {
            put(&mut rec[at..], part);
            at += part.len();
        }
        rec
    }
}

fn put(dst: &mut [u8], src: &[u8]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

fn padded_len(n: usize) -> usize {
    n.div_ceil(RECORD) * RECORD
}

fn invalid(msg: impl Into<String>) -> Error {
    Error::Validation(msg.into())
}

/// Forward-only view over the 80-byte records of a file.
struct Records<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Records<'a> {
    fn has_record(&self) -> bool {
        self.data.len() - self.pos >= RECORD
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        let have = self.data.len() - self.pos;
        if n > have {
            return Err(invalid(format!(
                "transport file ends inside {what} at offset {} ({n} bytes needed, {have} left)",
                self.pos
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn record(&mut self, what: &str) -> Result<&'a [u8]> {
        self.take(RECORD, what)
    }

    fn header(&mut self, kind: Header, member: &str) -> Result<&'a [u8]> {
        let at = self.pos;
        let rec = self.record("a header record")?;
        if !kind.is(rec) {
            let seen = String::from_utf8_lossy(&rec[..48]).into_owned();
            return Err(invalid(format!(
                "expected {} header{member} at offset {at}, found {seen:?}",
                String::from_utf8_lossy(kind.tag()).trim_end()
            )));
        }
        Ok(rec)
    }

    /// Bytes up to the next member header, or to the end of the file.
    fn observations(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        let next = Header::Member.record("");
        let marker = &next[..HEADER_LEAD.len() + 7];
        let len = rest.windows(marker.len()).position(|w| w == marker).unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }
}

/// The fields of a namestr record this crate uses.
#[derive(Debug, Clone)]
struct Namestr {
    var: XptVariable,
    /// Byte offset of the variable inside an observation.
    offset: usize,
}

impl Namestr {
    /// Layout: ntype 0..2, nlng 4..6, nvar0 6..8, nname 8..16, nlabel 16..56,
    /// nform 56..64, npos 84..88.
    fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < 88 {
            return Err(invalid(format!("namestr of {} bytes is too short", raw.len())));
        }
        let be16 = |at: usize| usize::from(u16::from_be_bytes([raw[at], raw[at + 1]]));
        let var_type = match be16(0) {
            1 => XptVarType::Numeric,
            2 => XptVarType::Character,
            t => return Err(invalid(format!("namestr has unknown variable type {t}"))),
        };
        let length = match (var_type, be16(4)) {
            (XptVarType::Numeric, 0) => 8,
            (_, n) => n,
        };
        Ok(Self {
            var: XptVariable {
                name: text(&raw[8..16]),
                label: text(&raw[16..56]),
                var_type,
                length,
                format: text(&raw[56..64]),
            },
            offset: u32::from_be_bytes([raw[84], raw[85], raw[86], raw[87]]) as usize,
        })
    }

    fn encode(&self, number: usize) -> [u8; NAMESTR] {
        let mut raw = [0u8; NAMESTR];
        let ntype: u16 = match self.var.var_type {
            XptVarType::Numeric => 1,
            XptVarType::Character => 2,
        };
        raw[0..2].copy_from_slice(&ntype.to_be_bytes());
        raw[4..6].copy_from_slice(&(self.var.length as u16).to_be_bytes());
        raw[6..8].copy_from_slice(&(number as u16).to_be_bytes());
        for (range, value) in [
            (8..16, &self.var.name),
            (16..56, &self.var.label),
            (56..64, &self.var.format),
        ] {
            raw[range.clone()].fill(b' ');
            put(&mut raw[range], value.as_bytes());
        }
        raw[72..80].fill(b' ');
        raw[84..88].copy_from_slice(&(self.offset as u32).to_be_bytes());
        raw
    }
}

fn decode(cell: &[u8], var_type: XptVarType) -> XptValue {
    match var_type {
        XptVarType::Character => {
            XptValue::Character(String::from_utf8_lossy(cell).trim_end().to_string())
        }
        XptVarType::Numeric => {
            // Short numerics keep the leading bytes of the full double.
            let mut full = [0u8; 8];
            put(&mut full, cell);
            ibm_to_ieee(full).map_or(XptValue::Missing, XptValue::Numeric)
        }
    }
}

/// Read every member of a transport file.
pub fn read_xpt(path: &Path) -> Result<Vec<XptDataset>> {
    read_xpt_with(path, &XptReadOptions::default())
}

/// [`read_xpt`] with column projection.
pub fn read_xpt_with(path: &Path, opts: &XptReadOptions) -> Result<Vec<XptDataset>> {
    let bytes = std::fs::read(path)
        .map_err(|e| Error::Io(std::io::Error::new(e.kind(), format!("{}: {e}", path.display()))))?;
    read_xpt_bytes_with(&bytes, opts)
}

/// Read every member of an in-memory transport file.
pub fn read_xpt_bytes(data: &[u8]) -> Result<Vec<XptDataset>> {
    read_xpt_bytes_with(data, &XptReadOptions::default())
}

/// [`read_xpt_bytes`] with column projection.
pub fn read_xpt_bytes_with(data: &[u8], opts: &XptReadOptions) -> Result<Vec<XptDataset>> {
    let mut records = Records { data, pos: 0 };
    if !Header::Library.is(records.record("the library header")?) {
        return Err(invalid("not a SAS transport file (no library header)"));
    }
    records.record("the library header")?;
    records.record("the library header")?;

    let keep = |name: &str| match &opts.columns {
        None => true,
        Some(cols) => cols.iter().any(|c| c.eq_ignore_ascii_case(name)),
    };

    let mut members = Vec::new();
    while records.has_record() {
        if data[records.pos..records.pos + RECORD].iter().all(|&b| b == b' ') {
            break;
        }
        members.push(read_member(&mut records, &keep)?);
    }
    Ok(members)
}

fn read_member(records: &mut Records<'_>, keep: &dyn Fn(&str) -> bool) -> Result<XptDataset> {
    let member = records.header(Header::Member, "")?;
    // VAX/VMS writers use 136-byte namestrs.
    let namestr_len = std::str::from_utf8(&member[74..78])
        .ok()
        .and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|&n| n >= 88)
        .unwrap_or(NAMESTR);
    records.header(Header::Descriptor, "")?;
    let name = text(&records.record("the member descriptor")?[8..16]);
    let label = text(&records.record("the member descriptor")?[32..72]);
    let ctx = format!(" in member '{name}'");

    let count = records.header(Header::Namestr, &ctx)?;
    let count_text = String::from_utf8_lossy(&count[54..58]).trim().to_string();
    let n_vars: usize = count_text
        .parse()
        .map_err(|_| invalid(format!("bad variable count {count_text:?}{ctx}")))?;
    let block = records.take(padded_len(n_vars * namestr_len), "the namestr block")?;
    let namestrs = block
        .chunks_exact(namestr_len)
        .take(n_vars)
        .map(Namestr::parse)
        .collect::<Result<Vec<_>>>()?;

    let row_len: usize = namestrs.iter().map(|n| n.var.length).sum();
    // Some writers leave npos at zero and rely on declaration order.
    let declared_offsets = namestrs.iter().skip(1).any(|n| n.offset != 0);
    let mut running = 0;
    let mut columns = Vec::new();
    for ns in namestrs {
        let offset = if declared_offsets { ns.offset } else { running };
        running += ns.var.length;
        if !keep(&ns.var.name) {
            continue;
        }
        if offset + ns.var.length > row_len {
            return Err(invalid(format!(
                "variable '{}' runs past the end of the observation{ctx}",
                ns.var.name
            )));
        }
        columns.push((ns.var, offset));
    }

    records.header(Header::Observations, &ctx)?;
    let obs = records.observations();
    let mut rows: Vec<&[u8]> =
        if row_len == 0 { Vec::new() } else { obs.chunks_exact(row_len).collect() };
    while rows.last().is_some_and(|r| r.iter().all(|&b| b == b' ')) {
        rows.pop();
    }
    let data = rows
        .into_iter()
        .map(|row| {
            columns
                .iter()
                .map(|(var, at)| decode(&row[*at..*at + var.length], var.var_type))
                .collect()
        })
        .collect();

    Ok(XptDataset { name, label, variables: columns.into_iter().map(|(v, _)| v).collect(), data })
}

/// Write `datasets` as one transport file.
pub fn write_xpt(path: &Path, datasets: &[XptDataset]) -> Result<()> {
    let bytes = write_xpt_bytes(datasets)?;
    std::fs::write(path, bytes)
        .map_err(|e| Error::Io(std::io::Error::new(e.kind(), format!("{}: {e}", path.display()))))
}

/// A blank record with `fields` placed at their offsets.
fn record_with(fields: &[(usize, &[u8])]) -> [u8; RECORD] {
    let mut rec = [b' '; RECORD];
    for &(at, value) in fields {
        put(&mut rec[at..], value);
    }
    rec
}

fn pad_to_record(buf: &mut Vec<u8>) {
    buf.resize(padded_len(buf.len()), b' ');
}

/// Encode `datasets` as a transport file in memory.
pub fn write_xpt_bytes(datasets: &[XptDataset]) -> Result<Vec<u8>> {
    let zeros30 = "0".repeat(30);
    let mut out = Vec::with_capacity(4096);
    out.extend_from_slice(&Header::Library.record(&zeros30));
    out.extend_from_slice(&record_with(&[
        (0, &b"SAS     SAS     SASLIB  9.4     X64_10HO"[..]),
        (64, STAMP),
    ]));
    out.extend_from_slice(&record_with(&[(0, STAMP)]));
    for ds in datasets {
        write_member(&mut out, ds)?;
    }
    Ok(out)
}

fn write_member(out: &mut Vec<u8>, ds: &XptDataset) -> Result<()> {
    let n_vars = ds.variables.len();
    if n_vars > 9999 {
        return Err(invalid(format!("member '{}' has {n_vars} variables; at most 9999 fit", ds.name)));
    }
    if let Some(bad) = ds.variables.iter().find(|v| !v.is_writable()) {
        return Err(invalid(format!(
            "variable '{}' ({:?}, {} bytes) cannot be written to member '{}'",
            bad.name, bad.var_type, bad.length, ds.name
        )));
    }

    out.extend_from_slice(&Header::Member.record("000000000000000001600000000140"));
    out.extend_from_slice(&Header::Descriptor.record(&"0".repeat(30)));
    out.extend_from_slice(&record_with(&[
        (0, &b"SAS     "[..]),
        (8, format!("{:<8}", ds.name).as_bytes()),
        (16, &b"SASDATA 9.4     X64_10HO"[..]),
        (64, STAMP),
    ]));
    out.extend_from_slice(&record_with(&[(0, STAMP), (32, ds.label.as_bytes())]));
    out.extend_from_slice(&Header::Namestr.record(&format!("000000{n_vars:04}{}", "0".repeat(20))));

    let mut offset = 0;
    let mut block = Vec::with_capacity(n_vars * NAMESTR);
    for (i, var) in ds.variables.iter().enumerate() {
        block.extend_from_slice(&Namestr { var: var.clone(), offset }.encode(i + 1));
        offset += var.length;
    }
    pad_to_record(&mut block);
    out.extend_from_slice(&block);

    out.extend_from_slice(&Header::Observations.record(&"0".repeat(30)));
    let mut obs = Vec::with_capacity(ds.data.len() * offset);
    for (r, row) in ds.data.iter().enumerate() {
        if row.len() != n_vars {
            return Err(invalid(format!(
                "row {r} of member '{}' has {} values for {n_vars} variables",
                ds.name,
                row.len()
            )));
        }
        for (value, var) in row.iter().zip(&ds.variables) {
            let width = var.length;
            match (var.var_type, value) {
                (XptVarType::Numeric, XptValue::Numeric(v)) => {
                    obs.extend_from_slice(&ieee_to_ibm(*v)[..width]);
                }
                (XptVarType::Numeric, XptValue::Missing) => {
                    obs.extend_from_slice(&missing_to_ibm()[..width]);
                }
                (XptVarType::Character, XptValue::Character(s)) => {
                    let start = obs.len();
                    obs.resize(start + width, b' ');
                    put(&mut obs[start..], s.as_bytes());
                }
                (XptVarType::Character, XptValue::Missing) => obs.resize(obs.len() + width, b' '),
                (expected, got) => {
                    return Err(invalid(format!(
                        "row {r}: {got:?} cannot go in {expected:?} variable '{}'",
                        var.name
                    )));
                }
            }
        }
    }
    pad_to_record(&mut obs);
    out.extend_from_slice(&obs);
    Ok(())
}
