//! 外部公開用のファイルID.
//!
//! ファイルIDは`(ボリュームID, キー, クッキー)`の三つ組で、
//! ワイヤ上では`"{vid},{hex(key‖cookie)}[_{delta}]"`という文字列で表現される.
//! 16進数部分は「キー(8バイト) ‖ クッキー(4バイト)」のビッグエンディアン連結で、
//! キーが全幅の場合には24文字となる.
//!
//! 末尾の`_{delta}`は任意の十進数で、復号後のキーに加算される.
//! ディレクトリが一度の要求でキーの範囲をまとめて払い出す際に利用される.
use std::fmt;
use std::str::FromStr;
use std::u128;
use trackable::error::ErrorKindExt;

use crate::{Error, ErrorKind, Result};

/// `key‖cookie`部分として許容される最小の16進数文字数（これ以下は拒否）.
const MIN_HASH_LEN: usize = 8;

/// `key‖cookie`部分として許容される最大の16進数文字数（キー8バイト+クッキー4バイト）.
const MAX_HASH_LEN: usize = 24;

/// 一つのneedleを外部から参照するための識別子.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    volume_id: u32,
    key: u64,
    cookie: u32,
}
impl FileId {
    /// 新しい`FileId`インスタンスを生成する.
    pub fn new(volume_id: u32, key: u64, cookie: u32) -> Self {
        FileId {
            volume_id,
            key,
            cookie,
        }
    }

    /// needleを所有するボリュームのIDを返す.
    pub fn volume_id(&self) -> u32 {
        self.volume_id
    }

    /// needleのキーを返す.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// needleのクッキーを返す.
    pub fn cookie(&self) -> u32 {
        self.cookie
    }
}
impl FromStr for FileId {
    type Err = Error;

    /// ワイヤ表現の文字列から`FileId`を生成する.
    ///
    /// # Errors
    ///
    /// 以下のいずれかの場合には、種類が`ErrorKind::InvalidFid`のエラーが返される:
    ///
    /// - `,`区切りが存在しない、またはボリュームIDが十進数ではない
    /// - 16進数部分が8文字以下・奇数長・24文字超、または16進数として不正
    /// - `_{delta}`が十進数ではない、または加算がキーを溢れさせる
    ///
    /// # Examples
    ///
    /// ```
    /// use needls::fid::FileId;
    ///
    /// let fid: FileId = "3,abcdef0123456789abcdef01".parse().unwrap();
    /// assert_eq!(fid.volume_id(), 3);
    /// assert_eq!(fid.key(), 0xabcd_ef01_2345_6789);
    /// assert_eq!(fid.cookie(), 0xabcd_ef01);
    ///
    /// assert!("3,ab".parse::<FileId>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self> {
        let comma = track_assert_some!(s.find(','), ErrorKind::InvalidFid, "No comma: {:?}", s);
        let (vid_part, rest) = (&s[..comma], &s[comma + 1..]);

        let volume_id = track!(vid_part
            .parse::<u64>()
            .map_err(|e| ErrorKind::InvalidFid.cause(e)))? as u32;

        let (hash, delta) = match rest.rfind('_') {
            Some(i) => (&rest[..i], Some(&rest[i + 1..])),
            None => (rest, None),
        };
        track_assert!(
            hash.len() > MIN_HASH_LEN && hash.len() <= MAX_HASH_LEN && hash.len() % 2 == 0,
            ErrorKind::InvalidFid,
            "Invalid key_hash: {:?} (length: {})",
            hash,
            hash.len()
        );
        let key_cookie =
            track!(u128::from_str_radix(hash, 16).map_err(|e| ErrorKind::InvalidFid.cause(e)))?;
        let mut key = (key_cookie >> 32) as u64;
        let cookie = key_cookie as u32;

        if let Some(delta) = delta {
            let d = track!(delta
                .parse::<u64>()
                .map_err(|e| ErrorKind::InvalidFid.cause(e)))?;
            key = track_assert_some!(
                key.checked_add(d),
                ErrorKind::InvalidFid,
                "Key overflow: {:?}",
                s
            );
        }
        Ok(FileId::new(volume_id, key, cookie))
    }
}
impl fmt::Display for FileId {
    /// `"{vid},{hex(key‖cookie)}"`形式で整形する（deltaが付与されることはない）.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{},{:016x}{:08x}", self.volume_id, self.key, self.cookie)
    }
}
impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, r#"FileId("{}")"#, self)
    }
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn parse_works() -> TestResult {
        let fid: FileId = track!("3,abcdef0123456789abcdef01".parse())?;
        assert_eq!(fid.volume_id(), 3);
        assert_eq!(fid.key(), 0xabcd_ef01_2345_6789);
        assert_eq!(fid.cookie(), 0xabcd_ef01);

        // キーが短縮表現されている場合（5バイト中1バイトがキー）
        let fid: FileId = track!("10,0700000001".parse())?;
        assert_eq!(fid.volume_id(), 10);
        assert_eq!(fid.key(), 0x07);
        assert_eq!(fid.cookie(), 1);
        Ok(())
    }

    #[test]
    fn parse_rejects_garbage() {
        for s in &[
            "3,ab",                          // 短すぎる
            "3,abcdef01",                    // 8文字ちょうどは拒否
            "3,abcdef012",                   // 奇数長
            "3,abcdef0123456789abcdef0123",  // キーがu64を超える
            "3,xycdef0123456789abcdef01",    // 16進数ではない
            "abcdef0123456789abcdef01",      // カンマ無し
            "x,abcdef0123456789abcdef01",    // ボリュームIDが十進数ではない
            "3,abcdef0123456789abcdef01_xy", // deltaが十進数ではない
        ] {
            let e = s.parse::<FileId>().err().map(|e| *e.kind());
            assert_eq!(e, Some(ErrorKind::InvalidFid), "input: {:?}", s);
        }
    }

    #[test]
    fn delta_is_added_to_key() -> TestResult {
        let base = FileId::new(7, 1000, 0xdead_beef);
        let fid: FileId = track!(format!("{}_42", base).parse())?;
        assert_eq!(fid.volume_id(), 7);
        assert_eq!(fid.key(), 1042);
        assert_eq!(fid.cookie(), 0xdead_beef);

        let overflowing = format!("{}_2", FileId::new(7, ::std::u64::MAX - 1, 0));
        assert_eq!(
            overflowing.parse::<FileId>().err().map(|e| *e.kind()),
            Some(ErrorKind::InvalidFid)
        );
        Ok(())
    }

    #[test]
    fn format_parse_roundtrip() -> TestResult {
        for &(vid, key, cookie) in &[
            (0, 0, 0),
            (3, 0xabcd_ef01_2345_6789, 0xabcd_ef01),
            (::std::u32::MAX, ::std::u64::MAX, ::std::u32::MAX),
        ] {
            let fid = FileId::new(vid, key, cookie);
            let parsed: FileId = track!(fid.to_string().parse())?;
            assert_eq!(parsed, fid);
        }
        Ok(())
    }
}
