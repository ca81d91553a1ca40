use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use common::{
    partition_for, JsonLinesCodec, KeyValue, KvCodec, LocalResourceProvider, LocalResultStorage,
    Location, MapReduceApp, NodeId, PartitionResult, ResourceId, ResourceKind, ResourceProvider,
    ResultStorage, StorageError, TaskDoneRequest, TaskReply,
};

/// Tope del backoff entre recuperaciones.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Suspended,
    Done,
}

/// Colaboradores que usa una tarea: funciones de negocio, lectura de
/// entradas, escritura de resultados y formato de intermedios.
pub struct TaskContext {
    pub app: Arc<dyn MapReduceApp>,
    pub provider: Arc<dyn ResourceProvider>,
    pub storage: Arc<dyn ResultStorage>,
    pub codec: Arc<dyn KvCodec>,
}

impl TaskContext {
    /// Contexto sobre el sistema de archivos, con intermedios en `work_dir`.
    pub fn local(app: Arc<dyn MapReduceApp>, work_dir: impl Into<PathBuf>) -> Self {
        let codec: Arc<dyn KvCodec> = Arc::new(JsonLinesCodec);
        Self {
            app,
            provider: Arc::new(LocalResourceProvider),
            storage: Arc::new(LocalResultStorage::new(work_dir, codec.clone())),
            codec,
        }
    }
}

/// Lo que deja el paso de claim.
#[derive(Debug)]
pub enum Claimed {
    Map { filename: String, contents: String },
    Reduce(Vec<KeyValue>),
}

/// Copia de lo necesario para un intento; se ejecuta fuera del lock.
#[derive(Debug, Clone)]
pub struct Attempt {
    id: ResourceId,
    inputs: Vec<Location>,
    n_reduce: u32,
    number: u32,
}

#[derive(Debug)]
pub enum AttemptOutcome {
    Done(TaskDoneRequest),
    Suspended(String),
}

/// Espejo local de un recurso mientras este nodo lo ejecuta.
#[derive(Debug, Clone)]
pub struct WorkerTask {
    id: ResourceId,
    inputs: Vec<Location>,
    n_reduce: u32,
    status: TaskStatus,
    attempts: u32,
    suspended_at: Option<Instant>,
    last_error: Option<String>,
    results: Vec<PartitionResult>,
    /// Todo lo que escribieron los intentos, completos o no.
    outputs: Vec<Location>,
    /// Reporte de fin que el coordinador todavía no confirmó.
    pending_report: Option<TaskDoneRequest>,
}

pub type SharedTask = Arc<Mutex<WorkerTask>>;

pub fn lock(task: &SharedTask) -> MutexGuard<'_, WorkerTask> {
    task.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WorkerTask {
    pub fn new(id: ResourceId, inputs: Vec<Location>, n_reduce: u32) -> Self {
        Self {
            id,
            inputs,
            n_reduce,
            status: TaskStatus::NotStarted,
            attempts: 0,
            suspended_at: None,
            last_error: None,
            results: Vec::new(),
            outputs: Vec::new(),
            pending_report: None,
        }
    }

    pub fn from_reply(reply: &TaskReply) -> Self {
        Self::new(
            reply.resource_id(),
            reply.input_locations.clone(),
            reply.reduce_count,
        )
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// "map-<id>" o "reduce-<id>"; clave de deduplicación.
    pub fn name(&self) -> String {
        self.id.task_name()
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn inputs(&self) -> &[Location] {
        &self.inputs
    }

    pub fn results(&self) -> &[PartitionResult] {
        &self.results
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn pending_report(&self) -> Option<&TaskDoneRequest> {
        self.pending_report.as_ref()
    }

    pub fn outputs(&self) -> &[Location] {
        &self.outputs
    }

    /// Anota lo escrito por un intento. Sin duplicados.
    pub fn record_outputs(&mut self, written: Vec<Location>) {
        for location in written {
            if !self.outputs.contains(&location) {
                self.outputs.push(location);
            }
        }
    }

    pub fn set_inputs(&mut self, inputs: Vec<Location>) {
        self.inputs = inputs;
    }

    /// MarkInProgress: arranca un intento nuevo.
    pub fn begin_attempt(&mut self) -> Attempt {
        self.status = TaskStatus::InProgress;
        self.attempts += 1;
        self.suspended_at = None;
        Attempt {
            id: self.id,
            inputs: self.inputs.clone(),
            n_reduce: self.n_reduce,
            number: self.attempts,
        }
    }

    pub fn suspend(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Suspended;
        self.suspended_at = Some(Instant::now());
        self.last_error = Some(reason.into());
    }

    /// OnDone: queda Done localmente y con el reporte pendiente de envío.
    pub fn complete(
        &mut self,
        results: Vec<PartitionResult>,
        node_id: Option<NodeId>,
    ) -> TaskDoneRequest {
        let report = TaskDoneRequest {
            resource_type: self.id.kind,
            resource_id: self.id.index,
            results: results.clone(),
            node_id,
        };
        self.status = TaskStatus::Done;
        self.last_error = None;
        self.results = results;
        self.pending_report = Some(report.clone());
        report
    }

    /// El coordinador recibió (o rechazó para siempre) el reporte.
    pub fn acknowledge(&mut self) {
        self.pending_report = None;
    }

    /// Vuelve a cero una tarea que el coordinador re-asignó tras perderla.
    pub fn restart(&mut self) {
        self.status = TaskStatus::NotStarted;
        self.attempts = 0;
        self.suspended_at = None;
        self.last_error = None;
        self.results.clear();
        self.outputs.clear();
        self.pending_report = None;
    }

    pub fn retryable(&self, max_attempts: u32) -> bool {
        self.attempts < max_attempts
    }

    /// base * 2^(intentos-1), con tope en MAX_BACKOFF.
    pub fn backoff(&self, base: Duration) -> Duration {
        let exp = self.attempts.saturating_sub(1).min(16);
        base.saturating_mul(1u32 << exp).min(MAX_BACKOFF)
    }

    pub fn ready_for_recovery(&self, now: Instant, base: Duration) -> bool {
        match (self.status, self.suspended_at) {
            (TaskStatus::Suspended, Some(at)) => {
                now.saturating_duration_since(at) >= self.backoff(base)
            }
            _ => false,
        }
    }

    /// Descarta todo lo que escribió esta tarea, incluidas las salidas
    /// parciales de intentos fallidos.
    pub fn destroy(&mut self, storage: &dyn ResultStorage) {
        for location in self.outputs.drain(..) {
            storage.discard(&location);
        }
        self.results.clear();
        self.pending_report = None;
    }
}

impl Attempt {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// ClaimResource: lee la entrada. Cualquier dato faltante suspende.
    pub fn claim(&self, ctx: &TaskContext) -> Result<Claimed, StorageError> {
        match self.id.kind {
            ResourceKind::Map => {
                let location = self
                    .inputs
                    .first()
                    .ok_or_else(|| StorageError::Unavailable(Location::new("")))?;
                let contents = ctx.provider.get_data(location)?;
                let filename = Path::new(&location.file)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| location.file.clone());
                Ok(Claimed::Map { filename, contents })
            }
            ResourceKind::Reduce => {
                let mut pairs = Vec::new();
                for location in &self.inputs {
                    let data = ctx.provider.get_data(location)?;
                    pairs.extend(ctx.codec.deserialize(&data)?);
                }
                Ok(Claimed::Reduce(pairs))
            }
        }
    }

    /// Progress: corre la función de negocio y persiste la salida.
    /// Cada archivo escrito queda en `written`, aunque después falle.
    pub fn progress(
        &self,
        claimed: Claimed,
        ctx: &TaskContext,
        written: &mut Vec<Location>,
    ) -> Result<Vec<PartitionResult>, StorageError> {
        match claimed {
            Claimed::Map { filename, contents } => {
                let n_reduce = self.n_reduce.max(1);
                let mut buckets: Vec<Vec<KeyValue>> = vec![Vec::new(); n_reduce as usize];
                for kv in ctx.app.map(&filename, &contents) {
                    let p = partition_for(&kv.key, n_reduce) as usize;
                    buckets[p].push(kv);
                }

                let mut results = Vec::with_capacity(buckets.len());
                for (p, bucket) in buckets.iter().enumerate() {
                    let result = ctx.storage.store_partition(self.id.index, p as u32, bucket)?;
                    written.push(result.location.clone());
                    results.push(result);
                }
                Ok(results)
            }
            Claimed::Reduce(mut pairs) => {
                pairs.sort_by(|a, b| a.key.cmp(&b.key));

                let mut lines = Vec::new();
                let mut values = Vec::new();
                let mut i = 0;
                while i < pairs.len() {
                    let key = &pairs[i].key;
                    let mut j = i;
                    values.clear();
                    while j < pairs.len() && &pairs[j].key == key {
                        values.push(pairs[j].value.clone());
                        j += 1;
                    }
                    lines.push(format!("{} {}", key, ctx.app.reduce(key, &values)));
                    i = j;
                }

                let location = ctx.storage.store_reduce_output(self.id.index, &lines)?;
                written.push(location.clone());
                Ok(vec![PartitionResult {
                    partition: self.id.index,
                    location,
                }])
            }
        }
    }
}

/// Pasos 2..4 de un intento ya iniciado con `begin_attempt`.
/// Bloqueante: pensado para `spawn_blocking`.
pub fn run_attempt(
    task: &SharedTask,
    attempt: Attempt,
    ctx: &TaskContext,
    node_id: &str,
) -> AttemptOutcome {
    // 2) claim
    let claimed = match attempt.claim(ctx) {
        Ok(c) => c,
        Err(e) => {
            let reason = format!("claim: {}", e);
            lock(task).suspend(reason.clone());
            return AttemptOutcome::Suspended(reason);
        }
    };

    // 3) progress
    let mut written = Vec::new();
    let progressed = attempt.progress(claimed, ctx, &mut written);
    let mut t = lock(task);
    t.record_outputs(written);
    let results = match progressed {
        Ok(r) => r,
        Err(e) => {
            let reason = format!("progress: {}", e);
            t.suspend(reason.clone());
            return AttemptOutcome::Suspended(reason);
        }
    };

    // 4) on done
    let report = t.complete(results, Some(node_id.to_string()));
    AttemptOutcome::Done(report)
}

/// Protocolo completo: MarkInProgress, claim, progress y on done.
pub fn execute(task: &SharedTask, ctx: &TaskContext, node_id: &str) -> AttemptOutcome {
    let attempt = lock(task).begin_attempt();
    run_attempt(task, attempt, ctx, node_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{intermediate_name, WordCount};
    use std::{env, fs};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("worker_task_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    fn ctx(dir: &Path) -> TaskContext {
        TaskContext::local(Arc::new(WordCount), dir.join("work"))
    }

    fn shared(task: WorkerTask) -> SharedTask {
        Arc::new(Mutex::new(task))
    }

    fn write_pairs(path: &Path, pairs: &[(&str, &str)]) {
        let pairs: Vec<KeyValue> = pairs.iter().map(|(k, v)| KeyValue::new(*k, *v)).collect();
        fs::write(path, JsonLinesCodec.serialize(&pairs).unwrap()).unwrap();
    }

    #[test]
    fn map_escribe_un_intermedio_por_particion() {
        let dir = temp_dir("map_ok");
        let input = dir.join("in.txt");
        fs::write(&input, "a b a c").unwrap();

        let task = shared(WorkerTask::new(
            ResourceId::map(4),
            vec![Location::new(input.to_string_lossy())],
            3,
        ));
        let outcome = execute(&task, &ctx(&dir), "n1");

        let report = match outcome {
            AttemptOutcome::Done(r) => r,
            other => panic!("se esperaba Done, vino {:?}", other),
        };
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.node_id.as_deref(), Some("n1"));

        let codec = JsonLinesCodec;
        let mut total = 0;
        for r in &report.results {
            assert!(r.location.file.ends_with(&intermediate_name(4, r.partition)));
            let pairs = codec
                .deserialize(&fs::read_to_string(&r.location.file).unwrap())
                .unwrap();
            for kv in &pairs {
                assert_eq!(partition_for(&kv.key, 3), r.partition);
            }
            total += pairs.len();
        }
        assert_eq!(total, 4);

        let t = lock(&task);
        assert_eq!(t.status(), TaskStatus::Done);
        assert!(t.pending_report().is_some());
    }

    #[test]
    fn claim_sin_entrada_suspende_la_tarea() {
        let dir = temp_dir("map_missing");
        let task = shared(WorkerTask::new(
            ResourceId::map(0),
            vec![Location::new(dir.join("no_existe.txt").to_string_lossy())],
            2,
        ));

        let outcome = execute(&task, &ctx(&dir), "n1");
        assert!(matches!(outcome, AttemptOutcome::Suspended(_)));

        let t = lock(&task);
        assert_eq!(t.status(), TaskStatus::Suspended);
        assert_eq!(t.attempts(), 1);
        assert!(t.last_error().unwrap().starts_with("claim"));
        assert!(t.pending_report().is_none());
    }

    #[test]
    fn reduce_ordena_agrupa_y_formatea() {
        let dir = temp_dir("reduce_ok");
        let a = dir.join("mr-0-1");
        let b = dir.join("mr-1-1");
        write_pairs(&a, &[("zeta", "1"), ("alfa", "1")]);
        write_pairs(&b, &[("alfa", "1")]);

        let task = shared(WorkerTask::new(
            ResourceId::reduce(1),
            vec![
                Location::new(a.to_string_lossy()),
                Location::new(b.to_string_lossy()),
            ],
            2,
        ));

        let report = match execute(&task, &ctx(&dir), "n1") {
            AttemptOutcome::Done(r) => r,
            other => panic!("se esperaba Done, vino {:?}", other),
        };
        assert_eq!(report.resource_type, ResourceKind::Reduce);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].partition, 1);

        let out = fs::read_to_string(&report.results[0].location.file).unwrap();
        assert_eq!(out, "alfa 2\nzeta 1\n");
    }

    #[test]
    fn reduce_con_intermedio_faltante_se_suspende_y_se_recupera() {
        let dir = temp_dir("reduce_retry");
        let input = dir.join("mr-0-0");
        let task = shared(WorkerTask::new(
            ResourceId::reduce(0),
            vec![Location::new(input.to_string_lossy())],
            1,
        ));
        let ctx = ctx(&dir);

        assert!(matches!(
            execute(&task, &ctx, "n1"),
            AttemptOutcome::Suspended(_)
        ));

        write_pairs(&input, &[("x", "1")]);
        assert!(matches!(execute(&task, &ctx, "n1"), AttemptOutcome::Done(_)));
        assert_eq!(lock(&task).attempts(), 2);
    }

    #[test]
    fn backoff_se_duplica_con_tope() {
        let mut task = WorkerTask::new(ResourceId::reduce(0), Vec::new(), 1);
        let base = Duration::from_millis(100);

        task.begin_attempt();
        assert_eq!(task.backoff(base), Duration::from_millis(100));
        task.begin_attempt();
        assert_eq!(task.backoff(base), Duration::from_millis(200));
        task.begin_attempt();
        assert_eq!(task.backoff(base), Duration::from_millis(400));

        for _ in 0..20 {
            task.begin_attempt();
        }
        assert_eq!(task.backoff(base), MAX_BACKOFF);
    }

    #[test]
    fn ready_for_recovery_respeta_el_backoff() {
        let mut task = WorkerTask::new(ResourceId::map(0), Vec::new(), 1);
        let base = Duration::from_secs(60);
        assert!(!task.ready_for_recovery(Instant::now(), base));

        task.begin_attempt();
        task.suspend("sin datos");
        assert!(!task.ready_for_recovery(Instant::now(), base));
        assert!(task.ready_for_recovery(Instant::now() + base, base));
        assert!(task.retryable(2));

        task.begin_attempt();
        assert!(!task.retryable(2));
    }

    #[test]
    fn destroy_borra_las_salidas_y_restart_vuelve_a_cero() {
        let dir = temp_dir("destroy");
        let ctx = ctx(&dir);
        let out = ctx.storage.store_reduce_output(0, &["a 1".to_string()]).unwrap();

        let mut task = WorkerTask::new(ResourceId::reduce(0), Vec::new(), 1);
        task.begin_attempt();
        task.complete(
            vec![PartitionResult {
                partition: 0,
                location: out.clone(),
            }],
            None,
        );
        task.acknowledge();
        assert!(task.pending_report().is_none());

        task.record_outputs(vec![out.clone()]);

        task.destroy(ctx.storage.as_ref());
        assert!(!Path::new(&out.file).exists());
        assert!(task.results().is_empty());
        assert!(task.outputs().is_empty());

        task.restart();
        assert_eq!(task.status(), TaskStatus::NotStarted);
        assert_eq!(task.attempts(), 0);
    }

    /// Guarda la partición 0 y falla en las demás.
    struct FailsAfterFirstPartition {
        inner: LocalResultStorage,
    }

    impl ResultStorage for FailsAfterFirstPartition {
        fn store_partition(
            &self,
            map_id: u32,
            partition: u32,
            pairs: &[KeyValue],
        ) -> Result<PartitionResult, StorageError> {
            if partition > 0 {
                return Err(StorageError::Unavailable(Location::new(
                    intermediate_name(map_id, partition),
                )));
            }
            self.inner.store_partition(map_id, partition, pairs)
        }

        fn store_reduce_output(
            &self,
            partition: u32,
            lines: &[String],
        ) -> Result<Location, StorageError> {
            self.inner.store_reduce_output(partition, lines)
        }

        fn discard(&self, location: &Location) {
            self.inner.discard(location)
        }
    }

    #[test]
    fn destroy_tras_agotar_intentos_borra_escrituras_parciales() {
        let dir = temp_dir("destroy_partial");
        let input = dir.join("in.txt");
        fs::write(&input, "a b c d e f").unwrap();

        let codec: Arc<dyn KvCodec> = Arc::new(JsonLinesCodec);
        let storage = Arc::new(FailsAfterFirstPartition {
            inner: LocalResultStorage::new(dir.join("work"), codec.clone()),
        });
        let ctx = TaskContext {
            app: Arc::new(WordCount),
            provider: Arc::new(LocalResourceProvider),
            storage: storage.clone(),
            codec,
        };

        let task = shared(WorkerTask::new(
            ResourceId::map(3),
            vec![Location::new(input.to_string_lossy())],
            2,
        ));
        for _ in 0..2 {
            assert!(matches!(
                execute(&task, &ctx, "n1"),
                AttemptOutcome::Suspended(_)
            ));
        }

        let partial = dir.join("work").join(intermediate_name(3, 0));
        assert!(partial.exists());

        let mut t = lock(&task);
        assert!(!t.retryable(2));
        assert!(t.last_error().unwrap().starts_with("progress"));
        assert_eq!(t.outputs().len(), 1);

        t.destroy(storage.as_ref());
        assert!(!partial.exists());
        assert!(t.outputs().is_empty());
    }
}
