use std;
use trackable;
use trackable::error::ErrorKindExt;

/// crate固有のエラー型.
#[derive(Debug, Clone, TrackableError)]
pub struct Error(trackable::error::TrackableError<ErrorKind>);
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if let Some(e) = e.get_ref().and_then(|e| e.downcast_ref::<Error>()).cloned() {
            e
        } else if e.kind() == std::io::ErrorKind::InvalidInput {
            ErrorKind::InvalidInput.cause(e).into()
        } else {
            ErrorKind::Io.cause(e).into()
        }
    }
}
impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        if *e.kind() == ErrorKind::InvalidInput {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
        } else {
            std::io::Error::new(std::io::ErrorKind::Other, e)
        }
    }
}
impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        ErrorKind::Io.cause(e.to_string()).into()
    }
}

/// 発生し得るエラーの種別.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// ファイルID文字列の構文が不正.
    ///
    /// 16進数部分が短すぎる・奇数長である・数値として解釈できない、等の場合に返される.
    ///
    /// # 典型的な対応策
    ///
    /// - 利用者側のプログラムを修正して入力を正しくする
    InvalidFid,

    /// 指定されたボリュームIDが、このストアないしディレクトリに存在しない.
    ///
    /// # 典型的な対応策
    ///
    /// - ディレクトリへの問い合わせで最新の対応表を取得し直す
    UnknownVolume,

    /// キーは存在するが、提示されたクッキーが書き込み時のものと一致しない.
    ///
    /// 総当たり列挙の防止が目的なので、このエラーの際に格納データの
    /// バイト列が呼び出し側へ渡ることはない.
    CookieMismatch,

    /// 指定されたキーがボリュームのインデックスに存在しない.
    ///
    /// 削除済みのキーへのアクセスも、このエラーになる.
    NotFound,

    /// 書き込み可能なボリュームが一つも残っていない.
    ///
    /// # 典型的な対応策
    ///
    /// - ボリュームサーバにボリュームを追加する
    /// - ボリュームサイズの上限値を引き上げる
    NoWritableVolumes,

    /// 書き込み先候補のボリュームIDが、どのマシンにも属していない.
    ///
    /// 内部状態が不整合に陥っており、プログラムにバグがあることを示している.
    OrphanVid,

    /// 採番要求の個数指定が、十進数として解釈できないか`0`だった.
    StrangeCount,

    /// フレームのヘッダを読み切る前にファイルが終端した.
    ///
    /// インデックスが指す位置にフレームが存在しないことを意味しており、
    /// ボリュームファイルが破損している可能性が高い.
    ShortRead,

    /// フレームの内容が壊れている.
    ///
    /// チェックサム不一致、ヘッダとインデックスの不整合、
    /// フレーム長がファイル長を超えている場合等にこのエラーが返される.
    ///
    /// # 典型的な対応策
    ///
    /// - もし人手で復旧可能な場合には復旧する
    /// - それが無理であれば、対象ボリュームを初期化する
    BadFrame,

    /// 入力が不正.
    ///
    /// # 典型的な対応策
    ///
    /// - 利用者側のプログラムを修正して入力を正しくする
    InvalidInput,

    /// 下層のOSエラー.
    ///
    /// # 典型的な対応策
    ///
    /// - 利用者側で（指数バックオフ等を挟みつつ）何度かリトライ
    ///   - それでもダメなら、致命的な異常が発生していると判断
    Io,
}
impl trackable::error::ErrorKind for ErrorKind {}
