//! ファイルIDの採番器.
//!
//! IDは`FILE_ID_SAVE_INTERVAL`個単位でまとめて予約され、
//! 予約した区間の上限値だけが`.seq`ファイルに永続化される.
//! 採番のたびにfsyncするのを避けるためのトレードオフで、
//! 不意の停止時には「予約済みだが未払い出し」のIDが最大一区間分
//! リークするが、払い出し済みのIDが再発行されることはない.
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use slog::Logger;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::Result;

/// 一度に予約されるIDの個数（永続化の粒度）.
pub const FILE_ID_SAVE_INTERVAL: u64 = 10_000;

/// 予約区間方式のファイルID採番器.
///
/// `.seq`ファイルの形式は、予約済み区間の上限値を表す
/// ビッグエンディアンのu64一つのみ. 新しい区間を予約するたびに
/// ファイル全体が書き直され、fsyncされる.
#[derive(Debug)]
pub struct FileIdSequence {
    path: PathBuf,
    logger: Logger,

    // 予約済み区間の上限値（ここまでのIDは払い出してよい）
    sequence: u64,

    // 現在の区間に残っている未払い出しのIDの個数
    counter: u64,
}
impl FileIdSequence {
    /// `dir/{name}.seq`から採番器を復元する.
    ///
    /// ファイルが存在しない場合は新規のストアとみなす.
    /// 存在する場合には、格納されている上限値にさらに一区間分を加えた
    /// 位置から再開する（前回の停止が区間の途中だった場合に、
    /// 払い出し済みのIDを再発行しないための安全側への倒し方）.
    pub fn load<P: AsRef<Path>>(dir: P, name: &str, logger: Logger) -> Result<Self> {
        let path = dir.as_ref().join(format!("{}.seq", name));
        let sequence = match File::open(&path) {
            Err(ref e) if e.kind() == io::ErrorKind::NotFound => {
                let sequence = FILE_ID_SAVE_INTERVAL;
                info!(logger, "Setting file id sequence"; "sequence" => sequence);
                sequence
            }
            Err(e) => return Err(track!(crate::Error::from(e))),
            Ok(mut file) => {
                let stored = track_io!(file.read_u64::<BigEndian>())?;
                let sequence = stored + FILE_ID_SAVE_INTERVAL;
                info!(logger, "Loading file id sequence";
                      "stored" => stored, "sequence" => sequence);
                sequence
            }
        };
        Ok(FileIdSequence {
            path,
            logger,
            sequence,
            // 最初の要求で必ず新しい区間の予約（と永続化）が走る
            counter: 0,
        })
    }

    /// `count`個のIDを払い出し、その先頭のIDを返す.
    ///
    /// 払い出される範囲は`[返り値, 返り値 + count - 1]`で、
    /// 呼び出しを跨いで単調増加し、重複することはない.
    ///
    /// # Errors
    ///
    /// 現在の区間にIDが足りない場合は新しい区間が予約されるが、
    /// その際の`.seq`ファイルへの書き込みに失敗した場合には、
    /// エラーが返される. このエラーは致命的で、以後の採番を
    /// 続けるとIDが衝突する恐れがある.
    pub fn next(&mut self, count: u64) -> Result<u64> {
        while self.counter < count {
            self.counter += FILE_ID_SAVE_INTERVAL;
            self.sequence += FILE_ID_SAVE_INTERVAL;
            track!(self.save())?;
        }
        self.counter -= count;
        let last = self.sequence - self.counter;
        Ok(last - count + 1)
    }

    /// 予約済み区間の現在の上限値を返す.
    pub fn reserved_limit(&self) -> u64 {
        self.sequence
    }

    fn save(&self) -> Result<()> {
        let mut file = track_io!(OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path))?;
        track_io!(file.write_u64::<BigEndian>(self.sequence))?;
        track_io!(file.sync_all())?;
        info!(self.logger, "Saved file id sequence";
              "sequence" => self.sequence, "path" => %self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use slog::{Discard, Logger};
    use std::fs::File;
    use tempdir::TempDir;
    use trackable::result::TestResult;

    use super::*;
    use byteorder::{BigEndian, ReadBytesExt};

    fn logger() -> Logger {
        Logger::root(Discard, o!())
    }

    fn stored_sequence(dir: &TempDir) -> u64 {
        let mut file = File::open(dir.path().join("directory.seq")).unwrap();
        file.read_u64::<BigEndian>().unwrap()
    }

    #[test]
    fn fresh_store_reserves_on_first_request() -> TestResult {
        let dir = track_io!(TempDir::new("needls_test"))?;
        let mut seq = track!(FileIdSequence::load(dir.path(), "directory", logger()))?;

        // 最初の要求で新しい区間が予約・永続化される
        assert_eq!(track!(seq.next(1))?, 10_001);
        assert_eq!(stored_sequence(&dir), 20_000);

        assert_eq!(track!(seq.next(1))?, 10_002);
        assert_eq!(track!(seq.next(3))?, 10_003);
        assert_eq!(track!(seq.next(1))?, 10_006);

        // 既存の区間内で足りている間は永続化されない
        assert_eq!(stored_sequence(&dir), 20_000);
        Ok(())
    }

    #[test]
    fn restart_skips_one_interval() -> TestResult {
        let dir = track_io!(TempDir::new("needls_test"))?;
        {
            let mut seq = track!(FileIdSequence::load(dir.path(), "directory", logger()))?;
            assert_eq!(track!(seq.next(1))?, 10_001);
            assert_eq!(stored_sequence(&dir), 20_000);
        }

        // 区間の途中で停止しても、再開後のIDが重複することはない
        let mut seq = track!(FileIdSequence::load(dir.path(), "directory", logger()))?;
        assert_eq!(track!(seq.next(1))?, 30_001);
        assert_eq!(stored_sequence(&dir), 40_000);
        Ok(())
    }

    #[test]
    fn ids_are_monotonic() -> TestResult {
        let dir = track_io!(TempDir::new("needls_test"))?;
        let mut seq = track!(FileIdSequence::load(dir.path(), "directory", logger()))?;

        let mut last = 0;
        for count in &[1, 7, 100, 9_999, 1, 25_000, 3] {
            let start = track!(seq.next(*count))?;
            assert!(start > last, "start={}, last={}", start, last);
            last = start + (count - 1);
            assert!(last <= seq.reserved_limit());
        }
        Ok(())
    }

    #[test]
    fn large_batches_reserve_enough_intervals() -> TestResult {
        let dir = track_io!(TempDir::new("needls_test"))?;
        let mut seq = track!(FileIdSequence::load(dir.path(), "directory", logger()))?;

        // 一区間を超える個数の要求でも、払い出し範囲は重ならない
        let a = track!(seq.next(25_000))?;
        let b = track!(seq.next(1))?;
        assert_eq!(a, 10_001);
        assert_eq!(b, 35_001);
        assert_eq!(stored_sequence(&dir), 40_000);
        Ok(())
    }
}
