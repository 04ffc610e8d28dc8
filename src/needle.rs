//! ボリュームファイルを構成するフレーム("needle")の符号化・復号.
//!
//! 一つのフレームのディスク上のレイアウトは以下の通り
//! （多バイト整数は全てビッグエンディアン）:
//!
//! ```text
//! cookie  : u32
//! key     : u64
//! size    : u32
//! data    : size bytes
//! checksum: u32          (dataのCRC32)
//! padding : 1〜8 bytes   (値は0x00)
//! ```
//!
//! フレーム全長は`20 + size + padding`で、常に8バイト境界に揃う.
//! このアライメントがあるため、ヘッダのみを読んでペイロードを
//! 読み飛ばす走査([`Needle::scan_next`])が可能となっている.
//!
//! `size == 0`のフレームは削除を表す墓標であり、
//! [`Volume::delete`]の内部でのみ生成される.
//!
//! [`Volume::delete`]: ../volume/struct.Volume.html#method.delete
use byteorder::{BigEndian, ByteOrder};
use crc32fast;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::{ErrorKind, Result};

/// フレームヘッダのバイト幅 (`cookie + key + size`).
pub const HEADER_SIZE: usize = 16;

/// チェックサムのバイト幅.
pub const CHECKSUM_SIZE: usize = 4;

/// フレームのアライメント境界（バイト単位）.
pub const ALIGNMENT: usize = 8;

/// フレーム全長を`u32`に収めるために許容されるペイロードの最大長（バイト単位）.
pub const MAX_DATA_SIZE: usize = (::std::u32::MAX - 28) as usize;

/// `size`バイトのペイロードを持つフレームの全長（パディング込み）を返す.
pub fn frame_len(size: u32) -> u64 {
    let body = u64::from(size) + (HEADER_SIZE + CHECKSUM_SIZE) as u64;
    let rest = ALIGNMENT as u64 - body % ALIGNMENT as u64;
    body + rest
}

/// ボリュームファイル内の一レコード.
///
/// `size`および`checksum`はフィールドとしては持たず、
/// それぞれペイロードの長さとCRC32から導出される.
///
/// フィールドは非公開で、生成は必ず[`Needle::new`]を経由する.
/// そのため「ペイロードが空ではなく`MAX_DATA_SIZE`以下」という不変条件は
/// 型の外から破ることができない（空のフレームは墓標と解釈されるため、
/// 通常の生成経路からは作れないようになっている）.
///
/// [`Needle::new`]: #method.new
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Needle {
    cookie: u32,
    key: u64,
    data: Vec<u8>,
}
impl Needle {
    /// 新しい`Needle`インスタンスを生成する.
    ///
    /// # Errors
    ///
    /// 以下のいずれかの場合には、種類が`ErrorKind::InvalidInput`のエラーが返される:
    ///
    /// - `data`が空（`size == 0`のフレームは墓標を意味するため）
    /// - `data`の長さが`MAX_DATA_SIZE`を超えている
    pub fn new(cookie: u32, key: u64, data: Vec<u8>) -> Result<Self> {
        track_assert!(!data.is_empty(), ErrorKind::InvalidInput, "Empty needle data");
        track_assert!(
            data.len() <= MAX_DATA_SIZE,
            ErrorKind::InvalidInput,
            "Too large needle data: {} bytes",
            data.len()
        );
        Ok(Needle { cookie, key, data })
    }

    /// 削除を表す墓標（ペイロード長0のフレーム）を生成する.
    pub(crate) fn tombstone(cookie: u32, key: u64) -> Self {
        Needle {
            cookie,
            key,
            data: Vec::new(),
        }
    }

    /// 書き込み時に割り当てられた乱数値を返す.
    ///
    /// 読み込み・削除時には同じ値の提示が要求される.
    pub fn cookie(&self) -> u32 {
        self.cookie
    }

    /// needleのキー（ボリューム内で一意な識別子）を返す.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// ペイロードを表すバイト列への参照を返す.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// 所有権を放棄して、内部のバイト列を返す.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// ペイロードの長さ（バイト単位）を返す.
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    /// ペイロードのCRC32を返す.
    pub fn checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data);
        hasher.finalize()
    }

    /// パディング済みのフレーム全体を一つのバッファとして組み立てる.
    ///
    /// バッファはゼロ初期化されているため、パディング領域に
    /// 未初期化のバイトが混入することはない.
    pub fn to_frame(&self) -> Vec<u8> {
        let size = self.size();
        let data_end = HEADER_SIZE + self.data.len();
        let mut frame = vec![0; frame_len(size) as usize];
        BigEndian::write_u32(&mut frame[0..4], self.cookie);
        BigEndian::write_u64(&mut frame[4..12], self.key);
        BigEndian::write_u32(&mut frame[12..16], size);
        frame[HEADER_SIZE..data_end].copy_from_slice(&self.data);
        BigEndian::write_u32(&mut frame[data_end..data_end + CHECKSUM_SIZE], self.checksum());
        frame
    }

    /// `writer`にフレームを書き込み、ペイロード長を返す.
    ///
    /// フレーム全体が一度の書き込み呼び出しで発行されるため、
    /// 途中で中断された場合でも半端なヘッダ断片がファイル上に
    /// 散らばることはない（トランスポート層がリクエストを
    /// 取り消した場合の回復は[`volume`]モジュール側が担う）.
    ///
    /// [`volume`]: ../volume/index.html
    pub fn append_to<W: Write>(&self, mut writer: W) -> Result<u32> {
        track_io!(writer.write_all(&self.to_frame()))?;
        Ok(self.size())
    }

    /// `reader`からペイロード長`size`のフレームを読み込む.
    ///
    /// # Errors
    ///
    /// - `size + 20`バイトを読み切れなかった場合は`ErrorKind::ShortRead`
    /// - ヘッダ中の`size`が引数と食い違う場合、およびチェックサムが
    ///   一致しない場合は`ErrorKind::BadFrame`
    pub fn read_from<R: Read>(mut reader: R, size: u32) -> Result<Self> {
        let mut buf = vec![0; size as usize + HEADER_SIZE + CHECKSUM_SIZE];
        match reader.read_exact(&mut buf) {
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                track_panic!(ErrorKind::ShortRead, "Incomplete frame: size={}", size)
            }
            result => track_io!(result)?,
        }

        let header = track!(NeedleHeader::parse(&buf[..HEADER_SIZE]))?;
        track_assert_eq!(header.size, size, ErrorKind::BadFrame);

        let data_end = HEADER_SIZE + size as usize;
        let data = Vec::from(&buf[HEADER_SIZE..data_end]);
        let stored = BigEndian::read_u32(&buf[data_end..data_end + CHECKSUM_SIZE]);

        let needle = Needle {
            cookie: header.cookie,
            key: header.key,
            data,
        };
        track_assert_eq!(
            needle.checksum(),
            stored,
            ErrorKind::BadFrame,
            "Checksum mismatch: key={}",
            needle.key
        );
        Ok(needle)
    }

    /// ヘッダのみを読んでペイロードを読み飛ばし、次のフレームの先頭へ進む.
    ///
    /// ボリュームのオープン時にインデックスを再構築するための走査用で、
    /// ペイロードはメモリ上に実体化されない.
    ///
    /// ファイル終端、もしくはヘッダを読み切る前に入力が尽きた場合には
    /// `Ok(None)`が返される（走査の正常な終了）.
    pub fn scan_next<R: Read + Seek>(mut reader: R) -> Result<Option<(NeedleHeader, u64)>> {
        let mut buf = [0; HEADER_SIZE];
        match reader.read_exact(&mut buf) {
            Err(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            result => track_io!(result)?,
        }
        let header = track!(NeedleHeader::parse(&buf[..]))?;
        let frame = frame_len(header.size);
        let skip = frame - HEADER_SIZE as u64;
        track_io!(reader.seek(SeekFrom::Current(skip as i64)))?;
        Ok(Some((header, frame)))
    }
}

/// フレームの先頭16バイトが保持する情報.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedleHeader {
    /// 書き込み時に割り当てられた乱数値.
    pub cookie: u32,

    /// needleのキー.
    pub key: u64,

    /// ペイロードの長さ（バイト単位）.
    ///
    /// `0`は墓標を意味する.
    pub size: u32,
}
impl NeedleHeader {
    fn parse(buf: &[u8]) -> Result<Self> {
        track_assert_eq!(buf.len(), HEADER_SIZE, ErrorKind::InvalidInput);
        Ok(NeedleHeader {
            cookie: BigEndian::read_u32(&buf[0..4]),
            key: BigEndian::read_u64(&buf[4..12]),
            size: BigEndian::read_u32(&buf[12..16]),
        })
    }
}
