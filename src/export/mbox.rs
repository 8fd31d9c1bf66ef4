//! Append-only MBOX archive writer.
//!
//! The archive is held under an exclusive advisory lock (and optionally a
//! `<archive>.lock` dot-lock) from [`MboxWriter::open`] until
//! [`MboxWriter::close`] or drop. Entries are written in mboxrd form:
//!
//! ```text
//! From <address> <asctime date>\n
//! <header block, LF line endings>\n
//! \n
//! <body, LF line endings, ^>*From  lines prefixed with '>'>\n
//! \n
//! ```

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info, warn};

use crate::config::ArchiveConfig;
use crate::error::{ConvertError, Result};
use crate::model::envelope::Envelope;
use crate::model::message::{MailMessage, ParsedMessage};
use crate::parser::mbox::needs_escape;

/// Exclusive, append-only handle on an MBOX archive.
pub struct MboxWriter {
    path: PathBuf,
    file: Option<File>,
    dotlock: Option<PathBuf>,
    fsync: bool,
    appended: u64,
}

impl MboxWriter {
    /// Create (if needed) and lock the archive at `path`.
    ///
    /// Fails fast with [`ConvertError::LockUnavailable`] when another writer
    /// holds the archive.
    pub fn open(path: impl AsRef<Path>, options: &ArchiveConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let dotlock = if options.dotlock {
            Some(acquire_dotlock(&path)?)
        } else {
            None
        };

        // From here on, dropping `writer` releases whatever has been acquired.
        let mut writer = Self {
            path,
            file: None,
            dotlock,
            fsync: options.fsync,
            appended: 0,
        };

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&writer.path)
            .map_err(|e| ConvertError::io(&writer.path, e))?;

        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(ConvertError::LockUnavailable(writer.path.clone()));
            }
            return Err(ConvertError::io(&writer.path, e));
        }
        writer.file = Some(file);

        writer.terminate_last_line()?;
        info!(path = %writer.path.display(), "Opened archive");
        Ok(writer)
    }

    /// Path of the archive.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries appended through this handle.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Append one entry.
    ///
    /// The entry is serialized in memory and written in one go. If the write
    /// fails the archive is truncated back to its previous length, so earlier
    /// entries stay intact.
    pub fn append(&mut self, envelope: &Envelope, message: &ParsedMessage) -> Result<()> {
        let entry = serialize_entry(envelope, message);
        let file = self.file.as_mut().ok_or_else(|| ConvertError::Write {
            path: self.path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "archive is closed"),
        })?;

        let start = append_entry(file, &entry, self.fsync).map_err(|source| ConvertError::Write {
            path: self.path.clone(),
            source,
        })?;

        self.appended += 1;
        debug!(offset = start, len = entry.len(), envelope = %envelope, "Appended entry");
        Ok(())
    }

    /// Flush to disk and release the locks. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let mut result = Ok(());

        if let Some(file) = self.file.take() {
            if let Err(e) = file.sync_all() {
                result = Err(ConvertError::io(&self.path, e));
            }
            if let Err(e) = FileExt::unlock(&file) {
                warn!(path = %self.path.display(), error = %e, "Could not unlock archive");
            }
            info!(path = %self.path.display(), entries = self.appended, "Closed archive");
        }

        if let Some(lock) = self.dotlock.take() {
            if let Err(e) = std::fs::remove_file(&lock) {
                warn!(path = %lock.display(), error = %e, "Could not remove dot-lock");
            }
        }

        result
    }

    /// Make sure new entries start on a fresh line of a non-empty archive.
    fn terminate_last_line(&mut self) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };
        let len = file
            .seek(SeekFrom::End(0))
            .map_err(|e| ConvertError::io(&self.path, e))?;
        if len == 0 {
            return Ok(());
        }

        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1))
            .and_then(|_| file.read_exact(&mut last))
            .map_err(|e| ConvertError::io(&self.path, e))?;
        if last[0] != b'\n' {
            file.write_all(b"\n")
                .map_err(|e| ConvertError::io(&self.path, e))?;
        }
        Ok(())
    }
}

impl Drop for MboxWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "Error while closing archive");
        }
    }
}

/// The file an archive is appended to.
trait ArchiveFile: Write + Seek {
    /// Cut the file back to `len` bytes.
    fn truncate_to(&mut self, len: u64) -> std::io::Result<()>;

    fn sync(&mut self) -> std::io::Result<()>;
}

impl ArchiveFile for File {
    fn truncate_to(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_data()
    }
}

/// Write `entry` at the end of `out` and return its offset.
///
/// On failure `out` is truncated back to its length before the call.
fn append_entry<F: ArchiveFile>(out: &mut F, entry: &[u8], fsync: bool) -> std::io::Result<u64> {
    let start = out.seek(SeekFrom::End(0))?;

    let written = out
        .write_all(entry)
        .and_then(|()| if fsync { out.sync() } else { Ok(()) });

    if let Err(e) = written {
        if let Err(rollback) = out.truncate_to(start) {
            warn!(offset = start, error = %rollback, "Could not roll back partial entry");
        }
        return Err(e);
    }
    Ok(start)
}

/// Take `<archive>.lock` with exclusive create.
///
/// A lock left behind by a process that no longer runs is removed and taken over.
fn acquire_dotlock(archive: &Path) -> Result<PathBuf> {
    let mut name = archive.as_os_str().to_owned();
    name.push(".lock");
    let lock = PathBuf::from(name);

    let created = match create_dotlock(&lock) {
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && break_stale_dotlock(&lock) => {
            create_dotlock(&lock)
        }
        other => other,
    };

    match created {
        Ok(()) => Ok(lock),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(ConvertError::LockUnavailable(archive.to_path_buf()))
        }
        Err(e) => Err(ConvertError::io(&lock, e)),
    }
}

fn create_dotlock(lock: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(lock)?;
    // Owner pid, as traditional dot-locks carry it.
    if let Err(e) = writeln!(file, "{}", std::process::id()) {
        warn!(path = %lock.display(), error = %e, "Could not record owner pid in dot-lock");
    }
    Ok(())
}

/// Remove `lock` if the pid recorded in it is no longer running.
///
/// Returns `true` when the lock was removed. Locks without a readable pid
/// are left alone.
fn break_stale_dotlock(lock: &Path) -> bool {
    let owner = std::fs::read_to_string(lock)
        .ok()
        .and_then(|content| content.trim().parse::<u32>().ok());
    let Some(pid) = owner else {
        debug!(path = %lock.display(), "Dot-lock has no owner pid, leaving it");
        return false;
    };
    if pid == std::process::id() || process_is_running(pid) {
        return false;
    }

    match std::fs::remove_file(lock) {
        Ok(()) => {
            warn!(path = %lock.display(), pid, "Removed stale dot-lock of a process that is gone");
            true
        }
        Err(e) => {
            warn!(path = %lock.display(), error = %e, "Could not remove stale dot-lock");
            false
        }
    }
}

fn process_is_running(pid: u32) -> bool {
    let mut system = sysinfo::System::new();
    system.refresh_process(sysinfo::Pid::from_u32(pid))
}

/// Serialize one archive entry, separator blank line included.
pub fn serialize_entry(envelope: &Envelope, message: &ParsedMessage) -> Vec<u8> {
    let header_len: usize = message.headers.iter().map(|h| h.raw.len() + 1).sum();
    let mut out = Vec::with_capacity(header_len + message.body.len() + 128);

    out.extend_from_slice(envelope.line().as_bytes());
    out.push(b'\n');

    for header in &message.headers {
        write_escaped_lines(&mut out, &header.raw);
    }
    out.push(b'\n');

    write_escaped_lines(&mut out, message.body());
    out.push(b'\n');
    out
}

/// Copy `data` line by line: CRLF becomes LF, `^>*From ` lines gain a `>`,
/// and non-empty data always ends with a newline.
fn write_escaped_lines(out: &mut Vec<u8>, data: &[u8]) {
    for line in data.split_inclusive(|&b| b == b'\n') {
        let content = line
            .strip_suffix(b"\n")
            .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
            .unwrap_or(line);
        if needs_escape(content) {
            out.push(b'>');
        }
        out.extend_from_slice(content);
        out.push(b'\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::mbox::read_archive;
    use crate::parser::message::MessageParser;
    use chrono::{Local, TimeZone};
    use std::io::Cursor;

    fn envelope(address: &str) -> Envelope {
        Envelope {
            address: address.to_string(),
            date: Local.with_ymd_and_hms(2024, 1, 4, 10, 0, 0).unwrap(),
            date_is_fallback: false,
        }
    }

    fn options() -> ArchiveConfig {
        ArchiveConfig::default()
    }

    #[test]
    fn test_serialize_entry_layout() {
        let msg = MessageParser::default()
            .parse(b"Subject: Hi\r\nFrom: a@b.com\r\n\r\nFrom me to you\r\nbye")
            .unwrap();
        let out = serialize_entry(&envelope("a@b.com"), &msg);
        assert_eq!(
            out,
            b"From a@b.com Thu Jan  4 10:00:00 2024\n\
              Subject: Hi\n\
              From: a@b.com\n\
              \n\
              >From me to you\n\
              bye\n\
              \n"
                .to_vec()
        );
    }

    #[test]
    fn test_serialize_empty_message() {
        let msg = ParsedMessage::default();
        let out = serialize_entry(&envelope("MAILER-DAEMON"), &msg);
        assert_eq!(
            out,
            b"From MAILER-DAEMON Thu Jan  4 10:00:00 2024\n\n\n".to_vec()
        );
    }

    #[test]
    fn test_append_and_read_back() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.mbox");
        let bodies: [&[u8]; 3] = [
            b"Subject: 1\n\nFrom the top\n>From quoted\nplain\n",
            b"Subject: 2\n\n>>From deep\n\nFrom again\n",
            b"Subject: 3\n\nlast\n",
        ];

        let mut writer = MboxWriter::open(&path, &options()).unwrap();
        for body in bodies {
            let msg = MessageParser::default().parse(body).unwrap();
            writer.append(&envelope("x@y.z"), &msg).unwrap();
        }
        assert_eq!(writer.appended(), 3);
        writer.close().unwrap();

        let entries = read_archive(&path).unwrap();
        assert_eq!(entries.len(), 3);
        for (entry, body) in entries.iter().zip(bodies) {
            assert_eq!(entry.message, body.to_vec());
            assert_eq!(entry.envelope, "From x@y.z Thu Jan  4 10:00:00 2024");
        }
    }

    #[test]
    fn test_second_writer_is_refused_by_dotlock() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.mbox");
        let _first = MboxWriter::open(&path, &options()).unwrap();
        let second = MboxWriter::open(&path, &options());
        assert!(matches!(second, Err(ConvertError::LockUnavailable(_))));
    }

    #[test]
    fn test_second_writer_is_refused_by_flock() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.mbox");
        let opts = ArchiveConfig {
            dotlock: false,
            ..ArchiveConfig::default()
        };
        let _first = MboxWriter::open(&path, &opts).unwrap();
        let second = MboxWriter::open(&path, &opts);
        assert!(matches!(second, Err(ConvertError::LockUnavailable(_))));
    }

    #[test]
    fn test_close_is_idempotent_and_releases_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.mbox");
        let mut writer = MboxWriter::open(&path, &options()).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(!tmp.path().join("out.mbox.lock").exists());

        let mut again = MboxWriter::open(&path, &options()).unwrap();
        again.close().unwrap();
    }

    #[test]
    fn test_drop_releases_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.mbox");
        {
            let _writer = MboxWriter::open(&path, &options()).unwrap();
        }
        assert!(MboxWriter::open(&path, &options()).is_ok());
    }

    #[test]
    fn test_append_after_close_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.mbox");
        let mut writer = MboxWriter::open(&path, &options()).unwrap();
        writer.close().unwrap();
        let err = writer
            .append(&envelope("a@b.c"), &ParsedMessage::default())
            .unwrap_err();
        assert!(matches!(err, ConvertError::Write { .. }));
    }

    /// In-memory archive that accepts `budget` more bytes, then fails.
    struct FailingArchive {
        data: Cursor<Vec<u8>>,
        budget: usize,
    }

    impl Write for FailingArchive {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.budget == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            self.data.write(&buf[..n])
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FailingArchive {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.data.seek(pos)
        }
    }

    impl ArchiveFile for FailingArchive {
        fn truncate_to(&mut self, len: u64) -> std::io::Result<()> {
            self.data.get_mut().truncate(len as usize);
            Ok(())
        }

        fn sync(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_append_rolls_back_partial_entry() {
        let parser = MessageParser::default();
        let first = serialize_entry(
            &envelope("one@x.y"),
            &parser.parse(b"Subject: 1\n\nfirst\n").unwrap(),
        );
        let second = serialize_entry(
            &envelope("two@x.y"),
            &parser.parse(b"Subject: 2\n\nsecond\n").unwrap(),
        );
        let third = serialize_entry(
            &envelope("three@x.y"),
            &parser.parse(b"Subject: 3\n\nFrom a long third body\n").unwrap(),
        );

        let mut archive = FailingArchive {
            data: Cursor::new(Vec::new()),
            budget: first.len() + second.len() + third.len() / 2,
        };
        assert_eq!(append_entry(&mut archive, &first, false).unwrap(), 0);
        assert_eq!(
            append_entry(&mut archive, &second, false).unwrap(),
            first.len() as u64
        );
        assert!(append_entry(&mut archive, &third, true).is_err());

        let bytes = archive.data.into_inner();
        assert_eq!(bytes, [first, second].concat());

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.mbox");
        std::fs::write(&path, &bytes).unwrap();
        let entries = read_archive(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, b"Subject: 1\n\nfirst\n".to_vec());
        assert_eq!(entries[1].message, b"Subject: 2\n\nsecond\n".to_vec());
    }

    /// Beyond any pid the platforms hand out.
    const DEAD_PID: u32 = 99_999_999;

    #[test]
    fn test_stale_dotlock_is_taken_over() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.mbox");
        let lock = tmp.path().join("out.mbox.lock");
        std::fs::write(&lock, format!("{DEAD_PID}\n")).unwrap();

        let mut writer = MboxWriter::open(&path, &options()).unwrap();
        let owner = std::fs::read_to_string(&lock).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());
        writer.close().unwrap();
        assert!(!lock.exists());
    }

    #[test]
    fn test_live_dotlock_is_respected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.mbox");
        let lock = tmp.path().join("out.mbox.lock");
        std::fs::write(&lock, format!("{}\n", std::process::id())).unwrap();

        let result = MboxWriter::open(&path, &options());
        assert!(matches!(result, Err(ConvertError::LockUnavailable(_))));
        assert!(lock.exists());
    }

    #[test]
    fn test_dotlock_without_pid_is_respected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.mbox");
        let lock = tmp.path().join("out.mbox.lock");
        std::fs::write(&lock, "").unwrap();

        let result = MboxWriter::open(&path, &options());
        assert!(matches!(result, Err(ConvertError::LockUnavailable(_))));
    }

    #[test]
    fn test_existing_archive_without_trailing_newline() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out.mbox");
        std::fs::write(&path, "From old Thu Jan  4 10:00:00 2024\nSubject: old\n\nold body").unwrap();

        let mut writer = MboxWriter::open(&path, &options()).unwrap();
        let msg = MessageParser::default().parse(b"Subject: new\n\nnew\n").unwrap();
        writer.append(&envelope("n@e.w"), &msg).unwrap();
        writer.close().unwrap();

        let entries = read_archive(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, b"Subject: old\n\nold body\n".to_vec());
        assert_eq!(entries[1].message, b"Subject: new\n\nnew\n".to_vec());
    }
}
