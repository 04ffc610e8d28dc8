//! Needle Storage.
//!
//! `needls`は、大量の小さな不変ファイル("needle")を格納するための追記専用ストレージ.
//!
//! # 特徴
//!
//! - 各needleは「64bit幅のキー」と「任意のバイト列」から構成され、
//!   一つの[ボリューム][volume]（追記専用ファイル）にフレーム単位で追記されていく
//! - フレームは8バイト境界にアライメントされており、ヘッダとCRC32チェックサムを持つ
//! - 読み込み・削除時には、書き込み時に割り当てられた32bitのクッキーの提示が必要
//!   （キーの総当たりによる列挙を防ぐため）
//! - 削除は墓標(tombstone)の追記によって表現され、既存のバイト列が上書きされることはない
//!   （領域の回収は行わない）
//! - 一つのボリュームサーバは[ストア][store]を一つ持ち、複数のボリュームを所有する
//! - 中央の[ディレクトリ][directory]が「ボリュームID→サーバ」の対応表と、
//!   書き込み可能ボリューム集合、およびファイルIDの採番を担当する
//! - ファイルIDの採番は一定間隔でまとめて予約され、上限値のみが永続化される
//!   （クラッシュ時にはIDが最大一区間分リークするが、衝突はしない）
//!
//! # モジュールの依存関係
//!
//! ```text
//! store => volume => needle
//! directory => fid
//! ```
//!
//! - [needle]モジュール: フレームの符号化・復号
//! - [volume]モジュール: 一つの追記専用ファイルとメモリ上のインデックス
//! - [store]モジュール: ボリューム群の所有とID別のディスパッチ
//! - [fid]モジュール: 外部公開用のファイルID文字列の構文
//! - [directory]モジュール: マシン台帳・書き込み先選択・ID採番
//! - [heartbeat]モジュール: ストアの状態をディレクトリへ定期通知するスレッド
//!
//! HTTP等のトランスポートはこのcrateには含まれない.
//! ストアとディレクトリの公開メソッド群、および[`MasterGateway`]が
//! トランスポートの接続面となる.
//!
//! [volume]: ./volume/index.html
//! [store]: ./store/index.html
//! [directory]: ./directory/index.html
//! [needle]: ./needle/index.html
//! [fid]: ./fid/index.html
//! [heartbeat]: ./heartbeat/index.html
//! [`MasterGateway`]: ./heartbeat/trait.MasterGateway.html
#![warn(missing_docs)]
extern crate byteorder;
extern crate crc32fast;
extern crate fibers;
extern crate futures;
#[cfg(unix)]
extern crate libc;
extern crate prometrics;
extern crate rand;
#[cfg(test)]
extern crate fibers_global;
#[cfg(test)]
extern crate tempdir;
#[macro_use]
extern crate slog;
#[macro_use]
extern crate trackable;

pub use crate::error::{Error, ErrorKind};

macro_rules! track_io {
    ($expr:expr) => {
        $expr.map_err(|e: ::std::io::Error| track!(crate::Error::from(e)))
    };
}

pub mod directory;
pub mod fid;
pub mod heartbeat;
pub mod metrics;
pub mod needle;
pub mod store;
pub mod volume;

mod error;

/// crate固有の`Result`型.
pub type Result<T> = ::std::result::Result<T, Error>;
