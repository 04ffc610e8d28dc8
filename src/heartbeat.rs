//! ストアの状態をディレクトリへ定期通知するハートビート.
//!
//! ハートビートには一つの専用OSスレッドが割り当てられ、
//! `pulse + jitter`（jitterは`[0, pulse)`の一様乱数）の間隔で
//! [`Store::join`]を呼び出し続ける.
//!
//! 通知の失敗はこのループで握り潰されてログに記録され、
//! 次のパルスでの再送に委ねられる（これがエラー回復の唯一の地点）.
//! ローカルにバックログは持たないため、送れなかった状態が
//! 後からまとめて送られることはない.
//!
//! [`Store::join`]: ../store/struct.Store.html#method.join
use fibers::sync::oneshot;
use futures::{Async, Future, Poll};
use prometrics::metrics::MetricBuilder;
use rand::Rng;
use slog::{Discard, Logger};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use trackable::error::ErrorKindExt;

use crate::metrics::HeartbeatMetrics;
use crate::store::{Store, StoreStatus};
use crate::{Error, ErrorKind, Result};

/// ストアの状態通知を受け取るディレクトリ側の口.
///
/// HTTP等の具体的なトランスポートはこのcrateの外にあり、
/// それぞれがこのトレイトを実装してハートビートに接続する.
/// 同一プロセスにディレクトリが同居する構成であれば、
/// [`Mapper::add`]を直接呼ぶ実装でも良い.
///
/// [`Mapper::add`]: ../directory/struct.Mapper.html#method.add
pub trait MasterGateway {
    /// ストアの現在状態をディレクトリへ送信する.
    fn join(&mut self, status: &StoreStatus) -> Result<()>;
}

/// `Heartbeat`のビルダ.
#[derive(Debug, Clone)]
pub struct HeartbeatBuilder {
    pulse: Duration,
    metrics: MetricBuilder,
    logger: Logger,
}
impl HeartbeatBuilder {
    /// デフォルト設定で`HeartbeatBuilder`インスタンスを生成する.
    pub fn new() -> Self {
        HeartbeatBuilder {
            pulse: Duration::from_secs(5),
            metrics: MetricBuilder::new(),
            logger: Logger::root(Discard, o!()),
        }
    }

    /// 通知間隔の基準値を設定する.
    ///
    /// 実際の間隔は毎回`pulse + jitter`となる（jitterは`[0, pulse)`の一様乱数）.
    /// 複数のボリュームサーバが同時に起動された場合に、
    /// 通知がディレクトリへ一斉に到着し続けるのを避けるため.
    ///
    /// デフォルト値は`Duration::from_secs(5)`.
    pub fn pulse(&mut self, pulse: Duration) -> &mut Self {
        self.pulse = pulse;
        self
    }

    /// メトリクス用の共通設定を登録する.
    ///
    /// デフォルト値は`MetricBuilder::new()`.
    pub fn metrics(&mut self, metrics: MetricBuilder) -> &mut Self {
        self.metrics = metrics;
        self
    }

    /// ハートビートスレッド用のloggerを登録する.
    ///
    /// デフォルトでは何も出力されない.
    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    /// ハートビートスレッドを起動する.
    ///
    /// # 注意
    ///
    /// 返り値の`Heartbeat`インスタンスが破棄されると、
    /// 起動したスレッドにも停止要求が送られるので注意が必要.
    pub fn spawn<G>(&self, store: Arc<Store>, mut gateway: G) -> Heartbeat
    where
        G: MasterGateway + Send + 'static,
    {
        let metrics = HeartbeatMetrics::new(&self.metrics);
        let logger = self.logger.clone();
        let pulse = self.pulse;

        let (stop_tx, stop_rx) = mpsc::channel();
        let (monitored, monitor) = oneshot::monitor();

        let thread_metrics = metrics.clone();
        thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let pulse_millis = duration_to_millis(pulse).max(1);
            let result = loop {
                match store.join(&mut gateway) {
                    Ok(()) => {
                        thread_metrics.joins.increment();
                        debug!(logger, "Heartbeat sent");
                    }
                    Err(e) => {
                        // 握り潰して次のパルスで再送する
                        thread_metrics.failed_joins.increment();
                        warn!(logger, "Cannot send the heartbeat: {}", e);
                    }
                }
                let jitter = Duration::from_millis(rng.gen_range(0, pulse_millis));
                match stop_rx.recv_timeout(pulse + jitter) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break Ok(()),
                }
            };
            monitored.exit(result);
        });

        Heartbeat {
            monitor,
            stop_tx,
            metrics,
            is_stopped: false,
        }
    }
}
impl Default for HeartbeatBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// ディレクトリへの定期通知を行うハートビート.
///
/// # Future実装
///
/// `Heartbeat`は[Future]を実装している.
///
/// 実際の通知は別スレッドで実行されるため`Future::poll`を呼び出さなくても
/// 進行上は支障はないが、このメソッドによりスレッドの終了
/// （正常ないし異常）を検知することが可能となる.
///
/// [Future]: https://docs.rs/futures/0.1/futures/future/trait.Future.html
#[must_use]
#[derive(Debug)]
pub struct Heartbeat {
    monitor: oneshot::Monitor<(), Error>,
    stop_tx: mpsc::Sender<()>,
    metrics: HeartbeatMetrics,
    is_stopped: bool,
}
impl Heartbeat {
    /// デフォルト設定でハートビートスレッドを起動する.
    ///
    /// 設定を変更したい場合には`HeartbeatBuilder`を使用すること.
    pub fn spawn<G>(store: Arc<Store>, gateway: G) -> Heartbeat
    where
        G: MasterGateway + Send + 'static,
    {
        HeartbeatBuilder::new().spawn(store, gateway)
    }

    /// ハートビートスレッドに停止要求を発行する.
    ///
    /// このメソッドが返った時点でスレッドが停止している保証はないので、
    /// 確実に終了を検知したい場合には`Future::poll`メソッド経由で知る必要がある.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(());
    }

    /// ハートビートのメトリクスを返す.
    pub fn metrics(&self) -> &HeartbeatMetrics {
        &self.metrics
    }
}
impl Future for Heartbeat {
    type Item = ();
    type Error = Error;
    fn poll(&mut self) -> Poll<Self::Item, Self::Error> {
        let result = track!(self.monitor.poll().map_err(|e| e.unwrap_or_else(|| {
            ErrorKind::Io
                .cause("Heartbeat thread terminated unintentionally")
                .into()
        })));
        if let Ok(Async::NotReady) = result {
        } else {
            self.is_stopped = true;
        }
        result
    }
}
impl Drop for Heartbeat {
    fn drop(&mut self) {
        if !self.is_stopped {
            self.stop();
        }
    }
}

fn duration_to_millis(d: Duration) -> u64 {
    d.as_secs() * 1_000 + u64::from(d.subsec_millis())
}
