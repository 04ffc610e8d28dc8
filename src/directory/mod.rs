//! ボリュームの所在を管理する中央ディレクトリ("master").
//!
//! ディレクトリは以下の三つを担当する:
//!
//! 1. マシン台帳: ハートビートで申告された各ボリュームサーバの状態.
//!    マシンの同一性はサーバのURLで判定され、再申告は登録の置き換えとなる
//! 2. 書き込み可能ボリューム集合: サイズが上限値未満のボリュームのID一覧.
//!    申告を取り込むたびにゼロから作り直される（満杯になったボリュームや
//!    申告から消えたボリュームは、この時点で集合から脱落する）
//! 3. ファイルIDの採番: [`FileIdSequence`]による予約区間方式
//!
//! 台帳を保護するロックと採番を保護するロックは独立しており、
//! 採番ロックを保持したまま台帳ロックを取得することはない.
//!
//! [`FileIdSequence`]: struct.FileIdSequence.html
use prometrics::metrics::MetricBuilder;
use rand::Rng;
use slog::{Discard, Logger};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub use self::sequence::{FileIdSequence, FILE_ID_SAVE_INTERVAL};

use crate::fid::FileId;
use crate::metrics::MapperMetrics;
use crate::volume::VolumeInfo;
use crate::{ErrorKind, Result};

mod sequence;

/// ボリュームサーバの識別情報.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineInfo {
    /// サーバのURL（`<name or ip>[:port]`）. マシンの同一性はこの値で判定される.
    pub url: String,

    /// クライアントに公開する読み込み用URL.
    pub public_url: String,
}

/// ハートビートで申告された、ボリュームサーバ一台分の状態.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    /// サーバの識別情報.
    pub server: MachineInfo,

    /// サーバが所有しているボリュームの一覧.
    pub volumes: Vec<VolumeInfo>,
}
impl Machine {
    /// 新しい`Machine`インスタンスを生成する.
    pub fn new(url: &str, public_url: &str, volumes: Vec<VolumeInfo>) -> Self {
        Machine {
            server: MachineInfo {
                url: url.to_owned(),
                public_url: public_url.to_owned(),
            },
            volumes,
        }
    }
}

/// `Mapper`のビルダ.
#[derive(Debug, Clone)]
pub struct MapperBuilder {
    volume_size_limit: u64,
    metrics: MetricBuilder,
    logger: Logger,
}
impl MapperBuilder {
    /// デフォルト設定で`MapperBuilder`インスタンスを生成する.
    pub fn new() -> Self {
        MapperBuilder {
            volume_size_limit: 1024 * 1024 * 1024,
            metrics: MetricBuilder::new(),
            logger: Logger::root(Discard, o!()),
        }
    }

    /// ボリュームが書き込み可能とみなされるサイズの上限（バイト単位）を設定する.
    ///
    /// 申告されたサイズがこの値未満のボリュームだけが、
    /// 新規書き込みの割り当て先候補となる.
    ///
    /// デフォルト値は`1 GiB`.
    pub fn volume_size_limit(&mut self, limit: u64) -> &mut Self {
        self.volume_size_limit = limit;
        self
    }

    /// メトリクス用の共通設定を登録する.
    ///
    /// デフォルト値は`MetricBuilder::new()`.
    pub fn metrics(&mut self, metrics: MetricBuilder) -> &mut Self {
        self.metrics = metrics;
        self
    }

    /// ディレクトリ用のloggerを登録する.
    ///
    /// デフォルトでは何も出力されない.
    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    /// 採番状態を`dir/{name}.seq`から復元してディレクトリを構築する.
    pub fn open<P: AsRef<Path>>(&self, dir: P, name: &str) -> Result<Mapper> {
        let sequence = track!(FileIdSequence::load(dir, name, self.logger.clone()))?;
        Ok(Mapper {
            volume_size_limit: self.volume_size_limit,
            metrics: MapperMetrics::new(&self.metrics),
            logger: self.logger.clone(),
            machines: Mutex::new(MachineRegistry {
                machines: Vec::new(),
                vid_to_machine: HashMap::new(),
                writers: Arc::new(Vec::new()),
            }),
            sequence: Mutex::new(sequence),
        })
    }
}
impl Default for MapperBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// 台帳ロックの中身
#[derive(Debug)]
struct MachineRegistry {
    // 申告順のマシン一覧. 置き換え時も位置は保存される
    machines: Vec<Machine>,

    // ボリュームID -> `machines`内の位置
    vid_to_machine: HashMap<u32, usize>,

    // 書き込み可能ボリュームのID一覧. `add`のたびに作り直して差し替える
    // （読む側はArcのクローンを取ってロックの外で使う）
    writers: Arc<Vec<u32>>,
}

/// 「ボリュームID→マシン」の対応表とファイルID採番を担う、ディレクトリの本体.
///
/// 全ての操作は`&self`で行えるため、リクエストを並行に処理する
/// トランスポート層からは共有参照（ないし`Arc`）越しに利用できる.
#[derive(Debug)]
pub struct Mapper {
    volume_size_limit: u64,
    metrics: MapperMetrics,
    logger: Logger,
    machines: Mutex<MachineRegistry>,
    sequence: Mutex<FileIdSequence>,
}
impl Mapper {
    /// デフォルト設定でディレクトリを構築する.
    ///
    /// 設定を変更したい場合には`MapperBuilder`を使用すること.
    pub fn open<P: AsRef<Path>>(dir: P, name: &str) -> Result<Self> {
        track!(MapperBuilder::new().open(dir, name))
    }

    /// ディレクトリのメトリクスを返す.
    pub fn metrics(&self) -> &MapperMetrics {
        &self.metrics
    }

    /// ハートビートで届いたマシンの申告を台帳へ取り込む.
    ///
    /// 同じURLのマシンが既に登録されている場合には、その位置の登録が
    /// 丸ごと置き換えられる. 取り込み後、書き込み可能ボリューム集合は
    /// 全マシンの申告からゼロから作り直される. そのため、満杯になった
    /// ボリュームや申告に含まれなくなったボリュームは、この時点で
    /// 集合から脱落する.
    pub fn add(&self, machine: Machine) -> Result<()> {
        let mut registry = track!(self.machines.lock().map_err(crate::Error::from))?;

        let existing = registry
            .machines
            .iter()
            .position(|m| m.server.url == machine.server.url);
        let slot = match existing {
            Some(slot) => {
                registry.machines[slot] = machine;
                slot
            }
            None => {
                info!(self.logger, "New machine"; "url" => %machine.server.url);
                registry.machines.push(machine);
                registry.machines.len() - 1
            }
        };
        let vids = registry.machines[slot]
            .volumes
            .iter()
            .map(|v| v.id)
            .collect::<Vec<_>>();
        for vid in vids {
            registry.vid_to_machine.insert(vid, slot);
        }

        let mut writers = Vec::new();
        for machine in &registry.machines {
            for volume in &machine.volumes {
                if volume.size < self.volume_size_limit {
                    writers.push(volume.id);
                }
            }
        }
        self.metrics.machines.set(registry.machines.len() as f64);
        self.metrics.writable_volumes.set(writers.len() as f64);
        registry.writers = Arc::new(writers);
        Ok(())
    }

    /// 指定されたボリュームを所有しているマシンを検索する.
    ///
    /// # Errors
    ///
    /// どのマシンからも申告されたことのないIDの場合は、
    /// `ErrorKind::UnknownVolume`エラーが返される.
    pub fn get(&self, volume_id: u32) -> Result<Machine> {
        let registry = track!(self.machines.lock().map_err(crate::Error::from))?;
        let slot = track_assert_some!(
            registry.vid_to_machine.get(&volume_id).cloned(),
            ErrorKind::UnknownVolume,
            "volume_id={}",
            volume_id
        );
        Ok(registry.machines[slot].clone())
    }

    /// 現在書き込み可能なボリュームのID一覧のスナップショットを返す.
    pub fn writable_volumes(&self) -> Result<Arc<Vec<u32>>> {
        let registry = track!(self.machines.lock().map_err(crate::Error::from))?;
        Ok(Arc::clone(&registry.writers))
    }

    /// 新規書き込みの割り当て先を一つ選び、ファイルIDを払い出す.
    ///
    /// 返り値は`(先頭のファイルID, 払い出し個数, 書き込み先サーバ)`.
    /// 二個以上が払い出された場合、クライアントは先頭IDのキーに
    /// `1..個数`のデルタを加えた位置を続けて利用できる.
    ///
    /// `count`は払い出すIDの個数の十進数表現で、空文字列は`1`とみなされる.
    ///
    /// ボリュームの選択は書き込み可能集合からの一様ランダムで、
    /// 台帳ロックは採番中には保持されない.
    ///
    /// # Errors
    ///
    /// - `count`が十進数として不正、ないし`0`の場合は`ErrorKind::StrangeCount`
    /// - 書き込み可能なボリュームが無い場合は`ErrorKind::NoWritableVolumes`
    /// - 選ばれたボリュームの所有マシンが台帳から引けない場合は
    ///   `ErrorKind::OrphanVid`（内部不整合であり、本来は起こり得ない）
    pub fn pick_for_write(&self, count: &str) -> Result<(FileId, u64, MachineInfo)> {
        let count = if count.is_empty() {
            1
        } else {
            match count.parse::<u64>() {
                Ok(n) if n > 0 => n,
                _ => track_panic!(ErrorKind::StrangeCount, "count={:?}", count),
            }
        };

        let (writers, candidate) = {
            let registry = track!(self.machines.lock().map_err(crate::Error::from))?;
            let candidate = registry.machines.first().map(|m| m.server.url.clone());
            (Arc::clone(&registry.writers), candidate)
        };
        if writers.is_empty() {
            warn!(self.logger, "No more writable volumes");
            track_panic!(
                ErrorKind::NoWritableVolumes,
                "no writable volumes (one of machines: {:?})",
                candidate
            );
        }

        let mut rng = rand::thread_rng();
        let volume_id = writers[rng.gen_range(0, writers.len())];

        let key = {
            // 台帳ロックは持たずに採番する
            let mut sequence = track!(self.sequence.lock().map_err(crate::Error::from))?;
            track!(sequence.next(count))?
        };

        let server = {
            let registry = track!(self.machines.lock().map_err(crate::Error::from))?;
            let slot = track_assert_some!(
                registry.vid_to_machine.get(&volume_id).cloned(),
                ErrorKind::OrphanVid,
                "volume_id={}",
                volume_id
            );
            registry.machines[slot].server.clone()
        };

        self.metrics.picked_file_ids.add_u64(count);
        Ok((FileId::new(volume_id, key, rng.gen()), count, server))
    }
}
