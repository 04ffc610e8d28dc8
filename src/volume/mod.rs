//! 一つの追記専用ファイルとしてのボリューム.
//!
//! ボリュームはID（u32）で識別され、`{dir}/{id}.dat`というファイルを
//! 専有する. ファイルの中身は[needleフレーム][needle]の単純な連接で、
//! 先頭にスーパーブロック等は存在しない.
//!
//! オープン時にはファイル全体をヘッダ単位で走査してインデックスを再構築する.
//! 書き込みは常に末尾への追記で、削除も墓標フレームの追記として表現される
//! （領域の回収は行わないため、ファイルが縮むことはない）.
//!
//! [needle]: ../needle/index.html
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use self::index::{NeedleEntry, NeedleIndex};
use crate::needle::{self, Needle};
use crate::{ErrorKind, Result};

mod index;

/// ハートビートでディレクトリへ送られる、ボリューム一つ分の概要情報.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeInfo {
    /// ボリュームのID.
    pub id: u32,

    /// ボリュームファイルの現在の長さ（バイト単位）.
    ///
    /// ディレクトリはこの値と上限値を比較して、
    /// ボリュームが書き込み可能かどうかを判断する.
    pub size: u64,
}

/// 一つの追記専用ファイルと、そのファイル内へのインデックス.
///
/// 追記はボリューム毎のロックで直列化されるが、読み込みはインデックスの
/// スナップショットを取得した後、ロックを持たずに`pread`相当の呼び出しで
/// 行われるため、互いに競合しない.
#[derive(Debug)]
pub struct Volume {
    id: u32,
    path: PathBuf,
    file: File,
    index: RwLock<NeedleIndex>,
    tail: Mutex<u64>,
}
impl Volume {
    /// `dir/{id}.dat`をオープンし（存在しなければ作成し）、インデックスを再構築する.
    ///
    /// ファイルには排他ロックがかけられるため、同じボリュームファイルを
    /// 複数のプロセス・ストアが所有することはできない.
    ///
    /// # Errors
    ///
    /// 走査中にフレーム長がファイル長を超えるヘッダを発見した場合は、
    /// `ErrorKind::BadFrame`エラーが返される.
    /// ヘッダに満たない末尾の端数（追記の中断痕）は切り詰められる.
    pub fn open<P: AsRef<Path>>(dir: P, id: u32) -> Result<Self> {
        let path = dir.as_ref().join(format!("{}.dat", id));
        let mut file = track_io!(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path))?;
        track!(set_exclusive_file_lock(&file))?;

        let len = track_io!(file.metadata())?.len();
        track_io!(file.seek(SeekFrom::Start(0)))?;

        let mut index = NeedleIndex::new();
        let mut offset = 0;
        while let Some((header, frame)) = track!(Needle::scan_next(&mut file))? {
            let end = offset + frame;
            track_assert!(
                end <= len,
                ErrorKind::BadFrame,
                "Frame overflows the volume file: id={}, offset={}, frame={}, len={}",
                id,
                offset,
                frame,
                len
            );
            if header.size == 0 {
                // 墓標の再生
                index.remove(header.key);
            } else {
                index.insert(
                    header.key,
                    NeedleEntry {
                        offset,
                        size: header.size,
                        cookie: header.cookie,
                    },
                );
            }
            offset = end;
        }
        if offset < len {
            // ヘッダに満たない端数が残っている
            track_io!(file.set_len(offset))?;
        }

        Ok(Volume {
            id,
            path,
            file,
            index: RwLock::new(index),
            tail: Mutex::new(offset),
        })
    }

    /// ボリュームのIDを返す.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// バッキングファイルのパスを返す.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 指定されたキーのneedleを読み込む.
    ///
    /// # Errors
    ///
    /// - キーがインデックスに存在しない場合は`ErrorKind::NotFound`
    /// - クッキーが書き込み時のものと一致しない場合は`ErrorKind::CookieMismatch`
    ///   （この場合、格納データのバイト列がファイルから読み出されることはない）
    /// - フレームのチェックサム等が不正な場合は`ErrorKind::BadFrame`
    pub fn read(&self, key: u64, cookie: u32) -> Result<Needle> {
        let entry = {
            let index = track!(self.index.read().map_err(crate::Error::from))?;
            track_assert_some!(
                index.get(key),
                ErrorKind::NotFound,
                "id={}, key={}",
                self.id,
                key
            )
        };
        // 正しいクッキーがエラーメッセージ経由で漏れないよう、値は埋め込まない
        track_assert!(
            cookie == entry.cookie,
            ErrorKind::CookieMismatch,
            "id={}, key={}",
            self.id,
            key
        );

        let mut frame = vec![0; entry.size as usize + needle::HEADER_SIZE + needle::CHECKSUM_SIZE];
        match self.read_at(&mut frame, entry.offset) {
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => track_panic!(
                ErrorKind::ShortRead,
                "id={}, key={}, offset={}",
                self.id,
                key,
                entry.offset
            ),
            result => track_io!(result)?,
        }
        let needle = track!(Needle::read_from(&frame[..], entry.size))?;

        // インデックスとファイルの整合性検査
        track_assert_eq!(needle.key(), key, ErrorKind::BadFrame, "id={}", self.id);
        track_assert_eq!(
            needle.cookie(),
            entry.cookie,
            ErrorKind::BadFrame,
            "id={}",
            self.id
        );
        Ok(needle)
    }

    /// needleをボリューム末尾に追記し、ペイロード長を返す.
    ///
    /// 同じキーの既存エントリはインデックス上で上書きされる
    /// （古いフレームのバイト列はファイル上に残り続ける）.
    ///
    /// # Errors
    ///
    /// ペイロード長が`0`のneedle（墓標）が渡された場合は、
    /// `ErrorKind::InvalidInput`エラーが返される. `size == 0`のフレームは
    /// 削除の印として予約されており、書き込めるのは`delete`だけ
    /// （さもないと、オープン時の走査がこのキーを削除済みとして
    /// 再構築してしまい、生きているインデックスと食い違う）.
    pub fn write(&self, needle: &Needle) -> Result<u32> {
        track_assert!(
            needle.size() > 0,
            ErrorKind::InvalidInput,
            "Empty needle: id={}, key={}",
            self.id,
            needle.key()
        );
        let frame = needle.to_frame();
        let mut tail = track!(self.tail.lock().map_err(crate::Error::from))?;
        track!(self.write_at(&frame, *tail))?;

        let entry = NeedleEntry {
            offset: *tail,
            size: needle.size(),
            cookie: needle.cookie(),
        };
        // 追記順とインデックスの更新順を一致させるため、tailロックを
        // 保持したままインデックスを更新する
        {
            let mut index = track!(self.index.write().map_err(crate::Error::from))?;
            index.insert(needle.key(), entry);
        }
        *tail += frame.len() as u64;
        Ok(needle.size())
    }

    /// 指定されたキーのneedleを削除し、解放されたペイロード長を返す.
    ///
    /// 物理的には、同じキーとクッキーを持つ墓標フレームが追記され、
    /// キーがインデックスから取り除かれる. ファイルは縮まない.
    ///
    /// # Errors
    ///
    /// クッキーの検証は`read`と同一で、検証に失敗した場合には
    /// 一切の状態変更を行わずに`ErrorKind::CookieMismatch`が返される.
    pub fn delete(&self, key: u64, cookie: u32) -> Result<u32> {
        let mut tail = track!(self.tail.lock().map_err(crate::Error::from))?;
        let entry = {
            let index = track!(self.index.read().map_err(crate::Error::from))?;
            track_assert_some!(
                index.get(key),
                ErrorKind::NotFound,
                "id={}, key={}",
                self.id,
                key
            )
        };
        track_assert!(
            cookie == entry.cookie,
            ErrorKind::CookieMismatch,
            "id={}, key={}",
            self.id,
            key
        );

        let tombstone = Needle::tombstone(cookie, key);
        let frame = tombstone.to_frame();
        track!(self.write_at(&frame, *tail))?;
        {
            let mut index = track!(self.index.write().map_err(crate::Error::from))?;
            index.remove(key);
        }
        *tail += frame.len() as u64;
        Ok(entry.size)
    }

    /// ボリュームの概要情報を返す.
    pub fn status(&self) -> Result<VolumeInfo> {
        let tail = track!(self.tail.lock().map_err(crate::Error::from))?;
        Ok(VolumeInfo {
            id: self.id,
            size: *tail,
        })
    }

    /// 格納されているneedleの数を返す.
    pub fn needles(&self) -> Result<u64> {
        let index = track!(self.index.read().map_err(crate::Error::from))?;
        Ok(index.len())
    }

    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        use std::os::unix::fs::FileExt;
        self.file.read_exact_at(buf, offset)
    }
    #[cfg(not(unix))]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<()> {
        use std::io::Read;
        let _tail = self
            .tail
            .lock()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    #[cfg(unix)]
    fn write_at(&self, frame: &[u8], offset: u64) -> Result<()> {
        use std::os::unix::fs::FileExt;
        track_io!(self.file.write_all_at(frame, offset))?;
        Ok(())
    }
    #[cfg(not(unix))]
    fn write_at(&self, frame: &[u8], offset: u64) -> Result<()> {
        use std::io::Write;
        let mut file = &self.file;
        track_io!(file.seek(SeekFrom::Start(offset)))?;
        track_io!(file.write_all(frame))?;
        Ok(())
    }
}

#[cfg(unix)]
fn set_exclusive_file_lock(file: &File) -> Result<()> {
    use std::os::unix::io::AsRawFd;
    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } != 0 {
        track_io!(Err(io::Error::last_os_error()))
    } else {
        Ok(())
    }
}
#[cfg(not(unix))]
fn set_exclusive_file_lock(_file: &File) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use tempdir::TempDir;
    use trackable::result::TestResult;

    use super::*;
    use crate::needle::Needle;
    use crate::ErrorKind;

    #[test]
    fn write_read_works() -> TestResult {
        let dir = track_io!(TempDir::new("needls_test"))?;
        let volume = track!(Volume::open(dir.path(), 7))?;

        let needle = track!(Needle::new(0x1111_1111, 42, b"hello".to_vec()))?;
        assert_eq!(track!(volume.write(&needle))?, 5);

        let read = track!(volume.read(42, 0x1111_1111))?;
        assert_eq!(read.data(), &b"hello"[..]);
        assert_eq!(read.cookie(), 0x1111_1111);

        // クッキー不一致
        assert_eq!(
            volume.read(42, 0x2222_2222).err().map(|e| *e.kind()),
            Some(ErrorKind::CookieMismatch)
        );
        // 未知のキー
        assert_eq!(
            volume.read(43, 0x1111_1111).err().map(|e| *e.kind()),
            Some(ErrorKind::NotFound)
        );
        Ok(())
    }

    #[test]
    fn overwrite_updates_index() -> TestResult {
        let dir = track_io!(TempDir::new("needls_test"))?;
        let volume = track!(Volume::open(dir.path(), 1))?;

        track!(volume.write(&track!(Needle::new(10, 42, b"old".to_vec()))?))?;
        track!(volume.write(&track!(Needle::new(20, 42, b"newer".to_vec()))?))?;

        // 最後の書き込みのクッキーとデータが見える
        assert_eq!(
            volume.read(42, 10).err().map(|e| *e.kind()),
            Some(ErrorKind::CookieMismatch)
        );
        assert_eq!(track!(volume.read(42, 20))?.data(), &b"newer"[..]);
        Ok(())
    }

    #[test]
    fn empty_write_is_rejected() -> TestResult {
        let dir = track_io!(TempDir::new("needls_test"))?;
        let volume = track!(Volume::open(dir.path(), 1))?;

        // 墓標の書き込みはdelete専用
        assert_eq!(
            volume.write(&Needle::tombstone(1, 42)).err().map(|e| *e.kind()),
            Some(ErrorKind::InvalidInput)
        );
        assert_eq!(track!(volume.status())?.size, 0);
        assert_eq!(
            volume.read(42, 1).err().map(|e| *e.kind()),
            Some(ErrorKind::NotFound)
        );
        Ok(())
    }

    #[test]
    fn delete_appends_tombstone() -> TestResult {
        let dir = track_io!(TempDir::new("needls_test"))?;
        let volume = track!(Volume::open(dir.path(), 7))?;

        track!(volume.write(&track!(Needle::new(0x1111_1111, 42, b"hello".to_vec()))?))?;
        let before = track!(volume.status())?.size;

        // クッキーが合わない削除は拒否され、状態は変化しない
        assert_eq!(
            volume.delete(42, 0x2222_2222).err().map(|e| *e.kind()),
            Some(ErrorKind::CookieMismatch)
        );
        assert_eq!(track!(volume.status())?.size, before);

        assert_eq!(track!(volume.delete(42, 0x1111_1111))?, 5);
        assert_eq!(
            volume.read(42, 0x1111_1111).err().map(|e| *e.kind()),
            Some(ErrorKind::NotFound)
        );
        // 墓標が追記されるため、ファイルは縮まず大きくなる
        assert!(track!(volume.status())?.size > before);
        assert_eq!(
            volume.delete(42, 0x1111_1111).err().map(|e| *e.kind()),
            Some(ErrorKind::NotFound)
        );
        Ok(())
    }

    #[test]
    fn reopen_rebuilds_index() -> TestResult {
        let dir = track_io!(TempDir::new("needls_test"))?;
        {
            let volume = track!(Volume::open(dir.path(), 3))?;
            track!(volume.write(&track!(Needle::new(1, 100, b"aaa".to_vec()))?))?;
            track!(volume.write(&track!(Needle::new(2, 200, b"bbbb".to_vec()))?))?;
            track!(volume.write(&track!(Needle::new(3, 300, b"c".to_vec()))?))?;
            track!(volume.delete(200, 2))?;
        }

        let volume = track!(Volume::open(dir.path(), 3))?;
        assert_eq!(track!(volume.needles())?, 2);
        assert_eq!(track!(volume.read(100, 1))?.data(), &b"aaa"[..]);
        assert_eq!(
            volume.read(200, 2).err().map(|e| *e.kind()),
            Some(ErrorKind::NotFound)
        );
        assert_eq!(track!(volume.read(300, 3))?.data(), &b"c"[..]);

        // 再オープン後も末尾位置は引き継がれる
        let size = track!(volume.status())?.size;
        assert_eq!(size % 8, 0);
        assert_eq!(size, 24 + 32 + 24 + 24);
        Ok(())
    }

    #[test]
    fn torn_tail_is_truncated_at_open() -> TestResult {
        let dir = track_io!(TempDir::new("needls_test"))?;
        let good_len = {
            let volume = track!(Volume::open(dir.path(), 9))?;
            track!(volume.write(&track!(Needle::new(1, 100, b"aaa".to_vec()))?))?;
            track!(volume.status())?.size
        };

        // 追記が途中で千切れた状況を再現する（ヘッダに満たない端数）
        let path = dir.path().join("9.dat");
        {
            use std::io::Write;
            let mut file = track_io!(fs::OpenOptions::new().append(true).open(&path))?;
            track_io!(file.write_all(&[0xFF; 7]))?;
        }

        let volume = track!(Volume::open(dir.path(), 9))?;
        assert_eq!(track!(volume.status())?.size, good_len);
        assert_eq!(track_io!(fs::metadata(&path))?.len(), good_len);
        assert_eq!(track!(volume.read(100, 1))?.data(), &b"aaa"[..]);
        Ok(())
    }

    #[test]
    fn frame_overflow_fails_open() -> TestResult {
        let dir = track_io!(TempDir::new("needls_test"))?;
        {
            let volume = track!(Volume::open(dir.path(), 9))?;
            track!(volume.write(&track!(Needle::new(1, 100, b"aaa".to_vec()))?))?;
        }

        // ペイロードが切り詰められたフレーム: ヘッダは読めるが全長が足りない
        let path = dir.path().join("9.dat");
        {
            use std::io::Write;
            let garbage = track!(Needle::new(2, 200, vec![0; 64]))?.to_frame();
            let mut file = track_io!(fs::OpenOptions::new().append(true).open(&path))?;
            track_io!(file.write_all(&garbage[..20]))?;
        }

        assert_eq!(
            Volume::open(dir.path(), 9).err().map(|e| *e.kind()),
            Some(ErrorKind::BadFrame)
        );
        Ok(())
    }
}
