//! [Prometheus][prometheus]用のメトリクス.
//!
//! [prometheus]: https://prometheus.io/
use prometrics::metrics::{Counter, Gauge, MetricBuilder};

/// [`Store`]のメトリクス.
///
/// [`Store`]: ../store/struct.Store.html
#[derive(Debug, Clone)]
pub struct StoreMetrics {
    pub(crate) read_needles: Counter,
    pub(crate) written_needles: Counter,
    pub(crate) written_bytes: Counter,
    pub(crate) deleted_needles: Counter,
    pub(crate) cookie_mismatches: Counter,
    pub(crate) volumes: Gauge,
}
impl StoreMetrics {
    /// ストアから読み込まれたneedleの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// needls_store_read_needles_total <COUNTER>
    /// ```
    pub fn read_needles(&self) -> u64 {
        self.read_needles.value() as u64
    }

    /// ストアに書き込まれたneedleの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// needls_store_written_needles_total <COUNTER>
    /// ```
    pub fn written_needles(&self) -> u64 {
        self.written_needles.value() as u64
    }

    /// ストアに書き込まれたペイロードのバイト数の合計.
    ///
    /// フレームのヘッダ・チェックサム・パディングは含まれない.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// needls_store_written_bytes_total <COUNTER>
    /// ```
    pub fn written_bytes(&self) -> u64 {
        self.written_bytes.value() as u64
    }

    /// ストアから削除されたneedleの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// needls_store_deleted_needles_total <COUNTER>
    /// ```
    pub fn deleted_needles(&self) -> u64 {
        self.deleted_needles.value() as u64
    }

    /// クッキー不一致で拒否された読み込み・削除の数.
    ///
    /// この値の増加は、不正なクライアントによる総当たりの試行を示唆する.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// needls_store_cookie_mismatches_total <COUNTER>
    /// ```
    pub fn cookie_mismatches(&self) -> u64 {
        self.cookie_mismatches.value() as u64
    }

    /// ストアが所有しているボリュームの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// needls_store_volumes <GAUGE>
    /// ```
    pub fn volumes(&self) -> u64 {
        self.volumes.value() as u64
    }

    pub(crate) fn new(builder: &MetricBuilder) -> Self {
        let mut builder = builder.clone();
        builder.namespace("needls").subsystem("store");
        StoreMetrics {
            read_needles: builder
                .counter("read_needles_total")
                .help("Number of needles read from the store")
                .finish()
                .expect("Never fails"),
            written_needles: builder
                .counter("written_needles_total")
                .help("Number of needles written to the store")
                .finish()
                .expect("Never fails"),
            written_bytes: builder
                .counter("written_bytes_total")
                .help("Number of payload bytes written to the store")
                .finish()
                .expect("Never fails"),
            deleted_needles: builder
                .counter("deleted_needles_total")
                .help("Number of needles deleted from the store")
                .finish()
                .expect("Never fails"),
            cookie_mismatches: builder
                .counter("cookie_mismatches_total")
                .help("Number of reads and deletes rejected by cookie verification")
                .finish()
                .expect("Never fails"),
            volumes: builder
                .gauge("volumes")
                .help("Number of volumes owned by the store")
                .finish()
                .expect("Never fails"),
        }
    }
}

/// [`Mapper`]のメトリクス.
///
/// [`Mapper`]: ../directory/struct.Mapper.html
#[derive(Debug, Clone)]
pub struct MapperMetrics {
    pub(crate) machines: Gauge,
    pub(crate) writable_volumes: Gauge,
    pub(crate) picked_file_ids: Counter,
}
impl MapperMetrics {
    /// 台帳に登録されているマシンの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// needls_mapper_machines <GAUGE>
    /// ```
    pub fn machines(&self) -> u64 {
        self.machines.value() as u64
    }

    /// 現在書き込み可能と判断されているボリュームの数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// needls_mapper_writable_volumes <GAUGE>
    /// ```
    pub fn writable_volumes(&self) -> u64 {
        self.writable_volumes.value() as u64
    }

    /// `pick_for_write`で払い出されたファイルIDの数.
    ///
    /// 一度の呼び出しで複数個が払い出された場合は、その個数分だけ加算される.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// needls_mapper_picked_file_ids_total <COUNTER>
    /// ```
    pub fn picked_file_ids(&self) -> u64 {
        self.picked_file_ids.value() as u64
    }

    pub(crate) fn new(builder: &MetricBuilder) -> Self {
        let mut builder = builder.clone();
        builder.namespace("needls").subsystem("mapper");
        MapperMetrics {
            machines: builder
                .gauge("machines")
                .help("Number of machines registered to the directory")
                .finish()
                .expect("Never fails"),
            writable_volumes: builder
                .gauge("writable_volumes")
                .help("Number of volumes currently considered writable")
                .finish()
                .expect("Never fails"),
            picked_file_ids: builder
                .counter("picked_file_ids_total")
                .help("Number of file ids handed out for writes")
                .finish()
                .expect("Never fails"),
        }
    }
}

/// [`Heartbeat`]のメトリクス.
///
/// [`Heartbeat`]: ../heartbeat/struct.Heartbeat.html
#[derive(Debug, Clone)]
pub struct HeartbeatMetrics {
    pub(crate) joins: Counter,
    pub(crate) failed_joins: Counter,
}
impl HeartbeatMetrics {
    /// ディレクトリへの通知に成功した回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// needls_heartbeat_joins_total <COUNTER>
    /// ```
    pub fn joins(&self) -> u64 {
        self.joins.value() as u64
    }

    /// ディレクトリへの通知に失敗した回数.
    ///
    /// 失敗はその場では回復されず、次のパルスで再送される.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// needls_heartbeat_failed_joins_total <COUNTER>
    /// ```
    pub fn failed_joins(&self) -> u64 {
        self.failed_joins.value() as u64
    }

    pub(crate) fn new(builder: &MetricBuilder) -> Self {
        let mut builder = builder.clone();
        builder.namespace("needls").subsystem("heartbeat");
        HeartbeatMetrics {
            joins: builder
                .counter("joins_total")
                .help("Number of successful status notifications to the directory")
                .finish()
                .expect("Never fails"),
            failed_joins: builder
                .counter("failed_joins_total")
                .help("Number of failed status notifications to the directory")
                .finish()
                .expect("Never fails"),
        }
    }
}
