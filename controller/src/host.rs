use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{de::DeserializeOwned, Serialize};
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{info, warn};

use boiler_common::{
    Actuator, Clock, HeatingConfig, HeatingController, HvacMode, ParameterStore, RuntimeConfig,
    Schedule, SensorError, StoreError, TemperatureSensor, ThermalParameters, TickTrigger,
    TOPIC_BOILER_SET, TOPIC_CMD_AUTO, TOPIC_CMD_MODE, TOPIC_CMD_SCHEDULE, TOPIC_CMD_TARGET,
    TOPIC_CONTROLLER_SCHEDULE_STATE, TOPIC_CONTROLLER_STATE, TOPIC_SENSOR_TEMP,
};

type Controller =
    HeatingController<SystemClock, MqttSensor, Schedule, MqttBoiler, JsonParameterStore>;

#[derive(Clone)]
struct AppState {
    controller: Arc<Mutex<Controller>>,
    schedule: Arc<Mutex<Schedule>>,
    mqtt: AsyncClient,
    store: AppStore,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    schedule_path: Arc<PathBuf>,
    parameters_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 2048;
const CONTROL_INTERVAL: Duration = Duration::from_secs(60);
const STATE_PUBLISH_INTERVAL: Duration = Duration::from_secs(10);
const SENSOR_RANGE_C: std::ops::RangeInclusive<f32> = -40.0..=85.0;

struct SystemClock {
    timezone: Tz,
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        let local = Utc::now().with_timezone(&self.timezone);
        local.with_timezone(&local.offset().fix())
    }
}

/// Latest temperature published on the sensor topic.
struct MqttSensor {
    latest: Option<(f32, Instant)>,
    stale_after: Duration,
}

impl MqttSensor {
    fn new(stale_after: Duration) -> Self {
        Self {
            latest: None,
            stale_after,
        }
    }

    fn record(&mut self, temp: f32, at: Instant) {
        self.latest = Some((temp, at));
    }
}

impl TemperatureSensor for MqttSensor {
    fn read(&mut self) -> Result<f32, SensorError> {
        let Some((temp, at)) = self.latest else {
            return Err(SensorError::Unavailable);
        };

        let age = at.elapsed();
        if age > self.stale_after {
            return Err(SensorError::Stale {
                age_secs: age.as_secs(),
            });
        }
        if !SENSOR_RANGE_C.contains(&temp) {
            return Err(SensorError::OutOfRange(temp));
        }
        Ok(temp)
    }
}

/// Retained `ON`/`OFF` output. The control loop re-sends the commanded state
/// every interval, so a command the client could not queue is repaired then.
struct MqttBoiler {
    mqtt: AsyncClient,
    last_sent: Option<bool>,
    undelivered: Option<bool>,
}

impl MqttBoiler {
    fn new(mqtt: AsyncClient) -> Self {
        Self {
            mqtt,
            last_sent: None,
            undelivered: None,
        }
    }
}

impl Actuator for MqttBoiler {
    fn set(&mut self, on: bool) {
        let payload = if on { "ON" } else { "OFF" };
        if self.last_sent != Some(on) {
            info!("boiler command: {payload}");
        }

        match self
            .mqtt
            .try_publish(TOPIC_BOILER_SET, QoS::AtLeastOnce, true, payload)
        {
            Ok(()) => {
                if self.undelivered.take().is_some() {
                    info!("boiler command {payload} queued after retry");
                }
                self.last_sent = Some(on);
            }
            Err(err) => {
                warn!("boiler command {payload} not queued, will retry: {err}");
                self.undelivered = Some(on);
            }
        }
    }
}

struct JsonParameterStore {
    path: PathBuf,
}

// Called with the controller lock held, so file io moves off the async worker.
impl ParameterStore for JsonParameterStore {
    fn load(&mut self) -> Result<ThermalParameters, StoreError> {
        let raw = tokio::task::block_in_place(|| std::fs::read(&self.path))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn save(&mut self, params: &ThermalParameters) -> Result<(), StoreError> {
        let payload = serde_json::to_vec_pretty(params)?;
        tokio::task::block_in_place(|| {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&self.path, payload)
        })?;
        Ok(())
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.heating.sanitize();

    let mut schedule = store.load_schedule().await.unwrap_or_else(|err| {
        warn!("failed to load schedule from store: {err:#}");
        Schedule::default()
    });
    schedule.normalize();

    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(runtime.mqtt.host.clone());
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.mqtt.port);

    let mut mqtt_options = MqttOptions::new("boiler-controller-rust", mqtt_host, mqtt_port);
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(runtime.mqtt.user.clone());
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(runtime.mqtt.pass.clone());
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let mut controller = HeatingController::new(
        runtime.heating.clone(),
        runtime.settings.clone(),
        SystemClock {
            timezone: parse_timezone(&runtime.timezone),
        },
        MqttSensor::new(Duration::from_secs(runtime.sensor_stale_secs)),
        schedule_source(&schedule),
        MqttBoiler::new(mqtt.clone()),
        JsonParameterStore {
            path: store.parameters_path.as_ref().clone(),
        },
    );
    // Overrides a retained ON left behind by a previous run.
    controller.reassert_actuator();

    let app_state = AppState {
        controller: Arc::new(Mutex::new(controller)),
        schedule: Arc::new(Mutex::new(schedule)),
        mqtt,
        store,
    };

    subscribe_topics(&app_state.mqtt).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_control_loop(app_state.clone());
    spawn_state_publish_loop(app_state.clone());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/target", post(handle_set_target))
        .route("/api/auto", post(handle_resume_auto))
        .route(
            "/api/schedule",
            get(handle_get_schedule).put(handle_put_schedule),
        )
        .route("/api/config", get(handle_get_config).put(handle_put_config))
        .with_state(app_state);

    let port = std::env::var("CONTROLLER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_SENSOR_TEMP,
        TOPIC_CMD_MODE,
        TOPIC_CMD_TARGET,
        TOPIC_CMD_AUTO,
        TOPIC_CMD_SCHEDULE,
    ];

    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_control_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CONTROL_INTERVAL);

        loop {
            interval.tick().await;
            let mut controller = app_state.controller.lock().await;
            controller.tick(TickTrigger::Timer);
            controller.reassert_actuator();
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATE_PUBLISH_INTERVAL);
        loop {
            interval.tick().await;

            let payload = {
                let controller = app_state.controller.lock().await;
                serde_json::to_vec(&controller.state_payload())
            };

            match payload {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("controller state publish failed: {err}");
                    }
                }
                Err(err) => warn!("controller state serialization failed: {err}"),
            }

            let schedule_payload = {
                let schedule = app_state.schedule.lock().await;
                serde_json::to_vec(&*schedule)
            };

            match schedule_payload {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(
                            TOPIC_CONTROLLER_SCHEDULE_STATE,
                            QoS::AtLeastOnce,
                            true,
                            body,
                        )
                        .await
                    {
                        warn!("schedule state publish failed: {err}");
                    }
                }
                Err(err) => warn!("schedule serialization failed: {err}"),
            }
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;
    let message = message.trim();

    match topic.as_str() {
        TOPIC_SENSOR_TEMP => {
            let temp = message
                .parse::<f32>()
                .with_context(|| format!("invalid temperature payload {message:?}"))?;
            if temp.is_finite() {
                let mut controller = app_state.controller.lock().await;
                controller.sensor_mut().record(temp, Instant::now());
                controller.tick(TickTrigger::SensorUpdate);
            }
        }
        TOPIC_CMD_MODE => {
            let Some(mode) = HvacMode::parse(message) else {
                warn!("ignoring unknown hvac mode {message:?}");
                return Ok(());
            };
            let changed = app_state.controller.lock().await.set_hvac_mode(mode);
            if changed {
                persist_runtime_from_state(app_state).await?;
            }
        }
        TOPIC_CMD_TARGET => {
            if let Ok(target) = message.parse::<f32>() {
                app_state.controller.lock().await.set_manual_target(target);
            }
        }
        TOPIC_CMD_AUTO => {
            app_state.controller.lock().await.resume_auto();
        }
        TOPIC_CMD_SCHEDULE => {
            let schedule = serde_json::from_str::<Schedule>(message)
                .context("invalid schedule payload")?;
            apply_schedule(app_state, schedule).await?;
        }
        _ => {}
    }
    Ok(())
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.controller.lock().await.status();
    Json(status)
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Some(mode) = HvacMode::parse(value) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid mode. Use 'HEAT' or 'OFF'");
    };

    let changed = state.controller.lock().await.set_hvac_mode(mode);
    if changed {
        if let Err(err) = persist_runtime_from_state(&state).await {
            warn!("failed to persist mode update: {err:#}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to persist runtime settings",
            );
        }
    }
    handle_get_status(State(state)).await.into_response()
}

async fn handle_set_target(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(target) = value.parse::<f32>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    };

    let applied = state.controller.lock().await.set_manual_target(target);
    if applied.is_none() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid temperature value");
    }
    handle_get_status(State(state)).await.into_response()
}

async fn handle_resume_auto(State(state): State<AppState>) -> impl IntoResponse {
    state.controller.lock().await.resume_auto();
    handle_get_status(State(state)).await.into_response()
}

async fn handle_get_schedule(State(state): State<AppState>) -> impl IntoResponse {
    let schedule = state.schedule.lock().await.clone();
    Json(schedule)
}

async fn handle_put_schedule(
    State(state): State<AppState>,
    Json(schedule): Json<Schedule>,
) -> impl IntoResponse {
    if let Err(err) = apply_schedule(&state, schedule).await {
        warn!("failed to persist schedule update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist schedule",
        );
    }
    handle_get_schedule(State(state)).await.into_response()
}

async fn handle_get_config(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.controller.lock().await.engine().config().clone();
    Json(config)
}

async fn handle_put_config(
    State(state): State<AppState>,
    Json(mut config): Json<HeatingConfig>,
) -> impl IntoResponse {
    config.sanitize();
    state.controller.lock().await.reconfigure(config);

    if let Err(err) = persist_runtime_from_state(&state).await {
        warn!("failed to persist heating config update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist runtime settings",
        );
    }
    handle_get_config(State(state)).await.into_response()
}

/// Swaps in a new weekly schedule. A disabled or empty schedule detaches the
/// schedule source from the controller entirely.
async fn apply_schedule(state: &AppState, mut schedule: Schedule) -> anyhow::Result<()> {
    schedule.normalize();
    {
        let mut active = state.schedule.lock().await;
        *active = schedule.clone();
    }
    {
        let mut controller = state.controller.lock().await;
        match schedule_source(&schedule) {
            Some(source) => controller.attach_schedule(source),
            None => {
                controller.detach_schedule();
            }
        }
    }
    state.store.save_schedule(&schedule).await
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("BOILER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.boiler"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            schedule_path: Arc::new(data_dir.join("schedule.json")),
            parameters_path: Arc::new(data_dir.join("thermal.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        self.read_json(&self.runtime_path).await
    }

    async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        self.write_json(&self.runtime_path, runtime).await
    }

    async fn load_schedule(&self) -> anyhow::Result<Schedule> {
        self.read_json(&self.schedule_path).await
    }

    async fn save_schedule(&self, schedule: &Schedule) -> anyhow::Result<()> {
        self.write_json(&self.schedule_path, schedule).await
    }

    /// Missing files read as the type's default.
    async fn read_json<T: DeserializeOwned + Default>(&self, path: &Path) -> anyhow::Result<T> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .with_context(|| format!("failed to parse {}", path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(path, payload)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

async fn persist_runtime_from_state(state: &AppState) -> anyhow::Result<()> {
    let (heating, settings) = {
        let controller = state.controller.lock().await;
        let engine = controller.engine();
        (engine.config().clone(), engine.settings().clone())
    };

    let mut runtime = state.store.load_runtime_config().await?;
    runtime.heating = heating;
    runtime.settings = settings;
    state.store.save_runtime_config(&runtime).await
}

fn schedule_source(schedule: &Schedule) -> Option<Schedule> {
    (schedule.enabled && !schedule.entries.is_empty()).then(|| schedule.clone())
}

fn parse_timezone(timezone: &str) -> Tz {
    timezone.parse().unwrap_or_else(|_| {
        warn!("unknown timezone {timezone:?}, falling back to UTC");
        Tz::UTC
    })
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
