//! ボリュームサーバ一台分のボリューム群を所有するストア.
//!
//! ストアは起動時にボリュームID集合（[`VolumeIdSet`]）を受け取り、
//! 対応するバッキングファイル群をオープンないし作成する.
//! 以後の読み書き・削除はボリュームIDによって各[`Volume`]へ
//! ディスパッチされる.
//!
//! ストア自身はネットワークを持たない. [ディレクトリ][directory]への
//! 状態通知は、[`Store::join`]に渡される[`MasterGateway`]実装
//! （トランスポート層が提供する）を通して行われる.
//!
//! [`VolumeIdSet`]: struct.VolumeIdSet.html
//! [`Volume`]: ../volume/struct.Volume.html
//! [`Store::join`]: struct.Store.html#method.join
//! [`MasterGateway`]: ../heartbeat/trait.MasterGateway.html
//! [directory]: ../directory/index.html
use prometrics::metrics::MetricBuilder;
use slog::{Discard, Logger};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub use self::ids::{VolumeIdSet, VolumeIds};

use crate::heartbeat::MasterGateway;
use crate::metrics::StoreMetrics;
use crate::needle::Needle;
use crate::volume::{Volume, VolumeInfo};
use crate::{ErrorKind, Result};

mod ids;

/// `Store`のビルダ.
#[derive(Debug, Clone)]
pub struct StoreBuilder {
    metrics: MetricBuilder,
    logger: Logger,
}
impl StoreBuilder {
    /// デフォルト設定で`StoreBuilder`インスタンスを生成する.
    pub fn new() -> Self {
        StoreBuilder {
            metrics: MetricBuilder::new(),
            logger: Logger::root(Discard, o!()),
        }
    }

    /// メトリクス用の共通設定を登録する.
    ///
    /// デフォルト値は`MetricBuilder::new()`.
    pub fn metrics(&mut self, metrics: MetricBuilder) -> &mut Self {
        self.metrics = metrics;
        self
    }

    /// ストア用のloggerを登録する.
    ///
    /// デフォルトでは何も出力されない.
    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    /// ストアを構築し、指定されたボリューム群をオープンする.
    pub fn open<P: AsRef<Path>>(
        &self,
        port: u16,
        public_url: &str,
        dir: P,
        volumes: &VolumeIdSet,
    ) -> Result<Store> {
        let store = Store {
            port,
            public_url: public_url.to_owned(),
            dir: dir.as_ref().to_path_buf(),
            volumes: RwLock::new(HashMap::new()),
            metrics: StoreMetrics::new(&self.metrics),
            logger: self.logger.clone(),
        };
        track!(store.add_volume_ids(volumes))?;
        Ok(store)
    }
}
impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// ボリュームサーバ上の全ボリュームを所有するストア.
///
/// 全ての操作は`&self`で行えるため、リクエストを並行に処理する
/// トランスポート層からは共有参照（ないし`Arc`）越しに利用できる.
/// ボリューム集合は読み書きロックで保護されており、
/// 各ボリューム内部の排他はボリューム毎に独立している
/// （あるボリュームへの追記が他のボリュームの読み込みを妨げることはない）.
#[derive(Debug)]
pub struct Store {
    port: u16,
    public_url: String,
    dir: PathBuf,
    volumes: RwLock<HashMap<u32, Volume>>,
    metrics: StoreMetrics,
    logger: Logger,
}
impl Store {
    /// デフォルト設定でストアを構築する.
    ///
    /// 設定を変更したい場合には`StoreBuilder`を使用すること.
    pub fn open<P: AsRef<Path>>(
        port: u16,
        public_url: &str,
        dir: P,
        volumes: &VolumeIdSet,
    ) -> Result<Self> {
        track!(StoreBuilder::new().open(port, public_url, dir, volumes))
    }

    /// ハートビートで名乗るポート番号を返す.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// 読み込みリクエストの転送先として公開するURLを返す.
    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// ストアのメトリクスを返す.
    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    /// ボリュームID集合の文字列表現を解釈し、未所有のボリュームを追加する.
    ///
    /// 既に所有しているIDが含まれていても何も起こらない（冪等）.
    pub fn add_volumes(&self, spec: &str) -> Result<()> {
        let ids = track!(spec.parse())?;
        track!(self.add_volume_ids(&ids))
    }

    /// 指定されたneedleを読み込む.
    ///
    /// # Errors
    ///
    /// ボリュームが未所有の場合は`ErrorKind::UnknownVolume`.
    /// それ以外は[`Volume::read`]に準ずる.
    ///
    /// [`Volume::read`]: ../volume/struct.Volume.html#method.read
    pub fn read(&self, volume_id: u32, key: u64, cookie: u32) -> Result<Needle> {
        let volumes = track!(self.volumes.read().map_err(crate::Error::from))?;
        let volume = track!(self.get_volume(&volumes, volume_id))?;
        let result = track!(volume.read(key, cookie));
        self.count_cookie_mismatch(&result);
        let needle = result?;
        self.metrics.read_needles.increment();
        Ok(needle)
    }

    /// needleを所有ボリュームに追記し、ペイロード長を返す.
    pub fn write(&self, volume_id: u32, needle: &Needle) -> Result<u32> {
        let volumes = track!(self.volumes.read().map_err(crate::Error::from))?;
        let volume = track!(self.get_volume(&volumes, volume_id))?;
        let size = track!(volume.write(needle))?;
        self.metrics.written_needles.increment();
        self.metrics.written_bytes.add_u64(u64::from(size));
        Ok(size)
    }

    /// 指定されたneedleを削除し、解放されたペイロード長を返す.
    pub fn delete(&self, volume_id: u32, key: u64, cookie: u32) -> Result<u32> {
        let volumes = track!(self.volumes.read().map_err(crate::Error::from))?;
        let volume = track!(self.get_volume(&volumes, volume_id))?;
        let result = track!(volume.delete(key, cookie));
        self.count_cookie_mismatch(&result);
        let size = result?;
        self.metrics.deleted_needles.increment();
        Ok(size)
    }

    /// 全ボリュームの概要情報を含む、ストアの現在状態のスナップショットを返す.
    ///
    /// 並行する書き込みとは競合しない（各ボリュームの末尾位置を
    /// 短い排他区間で読むだけなので、一貫した瞬間のサイズ一覧が得られる）.
    pub fn status(&self) -> Result<StoreStatus> {
        let volumes = track!(self.volumes.read().map_err(crate::Error::from))?;
        let mut infos = Vec::with_capacity(volumes.len());
        for volume in volumes.values() {
            infos.push(track!(volume.status())?);
        }
        infos.sort_by_key(|v| v.id);
        Ok(StoreStatus {
            port: self.port,
            public_url: self.public_url.clone(),
            volumes: infos,
        })
    }

    /// ストアの現在状態をディレクトリへ通知する.
    ///
    /// 通知先は引数のゲートウェイ（トランスポート実装）で抽象化されている.
    /// 失敗はこの層では回復されず、そのまま呼び出し側へ返される
    /// （定期再送は[`Heartbeat`]が担う）.
    ///
    /// [`Heartbeat`]: ../heartbeat/struct.Heartbeat.html
    pub fn join<G: MasterGateway>(&self, gateway: &mut G) -> Result<()> {
        let status = track!(self.status())?;
        track!(gateway.join(&status))
    }

    fn add_volume_ids(&self, ids: &VolumeIdSet) -> Result<()> {
        let mut volumes = track!(self.volumes.write().map_err(crate::Error::from))?;
        for id in ids.iter() {
            if volumes.contains_key(&id) {
                continue;
            }
            let volume = track!(Volume::open(&self.dir, id))?;
            info!(self.logger, "Volume opened"; "id" => id, "path" => %volume.path().display());
            volumes.insert(id, volume);
        }
        self.metrics.volumes.set(volumes.len() as f64);
        Ok(())
    }

    fn get_volume<'a>(
        &self,
        volumes: &'a HashMap<u32, Volume>,
        volume_id: u32,
    ) -> Result<&'a Volume> {
        let volume = track_assert_some!(
            volumes.get(&volume_id),
            ErrorKind::UnknownVolume,
            "volume_id={}",
            volume_id
        );
        Ok(volume)
    }

    fn count_cookie_mismatch<T>(&self, result: &Result<T>) {
        if let Err(ref e) = *result {
            if *e.kind() == ErrorKind::CookieMismatch {
                self.metrics.cookie_mismatches.increment();
            }
        }
    }
}

/// ハートビートでディレクトリへ送られる、ストア一台分のスナップショット.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStatus {
    /// ストアが待ち受けているポート番号.
    pub port: u16,

    /// 読み込みリクエストの転送先として公開するURL.
    pub public_url: String,

    /// 所有している全ボリュームの概要情報（ID昇順）.
    pub volumes: Vec<VolumeInfo>,
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;
    use trackable::result::TestResult;

    use super::*;
    use crate::needle::Needle;
    use crate::ErrorKind;

    fn ids(spec: &str) -> VolumeIdSet {
        spec.parse().unwrap()
    }

    #[test]
    fn dispatch_works() -> TestResult {
        let dir = track_io!(TempDir::new("needls_test"))?;
        let store = track!(Store::open(8080, "localhost:8080", dir.path(), &ids("1-3")))?;

        let needle = track!(Needle::new(0x11, 42, b"hello".to_vec()))?;
        assert_eq!(track!(store.write(2, &needle))?, 5);
        assert_eq!(track!(store.read(2, 42, 0x11))?.data(), &b"hello"[..]);

        // 他のボリュームには波及しない
        assert_eq!(
            store.read(1, 42, 0x11).err().map(|e| *e.kind()),
            Some(ErrorKind::NotFound)
        );
        // 未所有のボリューム
        assert_eq!(
            store.read(9, 42, 0x11).err().map(|e| *e.kind()),
            Some(ErrorKind::UnknownVolume)
        );

        assert_eq!(track!(store.delete(2, 42, 0x11))?, 5);
        assert_eq!(
            store.read(2, 42, 0x11).err().map(|e| *e.kind()),
            Some(ErrorKind::NotFound)
        );
        Ok(())
    }

    #[test]
    fn status_snapshot_works() -> TestResult {
        let dir = track_io!(TempDir::new("needls_test"))?;
        let store = track!(Store::open(8080, "localhost:8080", dir.path(), &ids("5,7")))?;

        track!(store.write(7, &track!(Needle::new(1, 1, b"hello".to_vec()))?))?;
        let status = track!(store.status())?;
        assert_eq!(status.port, 8080);
        assert_eq!(status.public_url, "localhost:8080");
        assert_eq!(status.volumes.len(), 2);
        assert_eq!(status.volumes[0].id, 5);
        assert_eq!(status.volumes[0].size, 0);
        assert_eq!(status.volumes[1].id, 7);
        assert_eq!(status.volumes[1].size, 32);
        Ok(())
    }

    #[test]
    fn add_volumes_is_idempotent() -> TestResult {
        let dir = track_io!(TempDir::new("needls_test"))?;
        let store = track!(Store::open(8080, "localhost:8080", dir.path(), &ids("1")))?;

        track!(store.write(1, &track!(Needle::new(1, 1, b"x".to_vec()))?))?;
        track!(store.add_volumes("1,2"))?;

        // 既存のボリュームは開き直されず、中身も保たれる
        assert_eq!(track!(store.read(1, 1, 1))?.data(), &b"x"[..]);
        assert_eq!(track!(store.status())?.volumes.len(), 2);
        assert_eq!(store.metrics().volumes(), 2);
        Ok(())
    }

    #[test]
    fn cookie_mismatches_are_counted() -> TestResult {
        let dir = track_io!(TempDir::new("needls_test"))?;
        let store = track!(Store::open(8080, "localhost:8080", dir.path(), &ids("1")))?;

        track!(store.write(1, &track!(Needle::new(0x11, 42, b"hello".to_vec()))?))?;
        assert!(store.read(1, 42, 0x22).is_err());
        assert!(store.delete(1, 42, 0x22).is_err());
        assert_eq!(store.metrics().cookie_mismatches(), 2);
        Ok(())
    }
}
