//! ボリュームに格納されているneedle群の位置情報を管理するためのインデックス.
use std::collections::BTreeMap;

/// インデックスの一エントリ.
///
/// needleの実体を読まずにクッキーの検証が行えるように、
/// 位置情報に加えてクッキーも記憶しておく.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeedleEntry {
    /// フレーム先頭のファイル内オフセット（バイト単位）.
    pub offset: u64,

    /// ペイロードの長さ（バイト単位）.
    pub size: u32,

    /// 書き込み時に割り当てられたクッキー.
    pub cookie: u32,
}

/// キーからneedleの位置情報を引くためのインデックス.
///
/// このインデックス自体が永続化されることはないメモリ上のデータ構造であり、
/// ボリュームのオープン時に、ファイルの走査によって毎回再構築される.
#[derive(Debug, Clone, Default)]
pub struct NeedleIndex {
    // `BTreeMap`の方が`HashMap`よりもメモリ効率が良いので、こちらを採用
    map: BTreeMap<u64, NeedleEntry>,
}
impl NeedleIndex {
    /// 新しい`NeedleIndex`インスタンスを生成する.
    pub fn new() -> Self {
        NeedleIndex {
            map: BTreeMap::new(),
        }
    }

    /// 指定されたキーのエントリを検索する.
    pub fn get(&self, key: u64) -> Option<NeedleEntry> {
        self.map.get(&key).cloned()
    }

    /// エントリを登録する（既存のエントリは上書きされる）.
    pub fn insert(&mut self, key: u64, entry: NeedleEntry) {
        self.map.insert(key, entry);
    }

    /// 指定されたキーのエントリを削除する.
    pub fn remove(&mut self, key: u64) -> Option<NeedleEntry> {
        self.map.remove(&key)
    }

    /// インデックスのサイズ(i.e., 登録needle数)を返す.
    pub fn len(&self) -> u64 {
        self.map.len() as u64
    }
}
