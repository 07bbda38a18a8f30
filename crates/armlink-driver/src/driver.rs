//! 机械臂驱动
//!
//! [`RobotArmDriver`] 把上层调用翻译为线路命令：
//!
//! ```text
//! 调用方 ─▶ 校验 / 软限位 ─▶ 轴变换(出站) ─▶ ArmCommand ─▶ SerialTransport(门)
//!                                                            │
//! 事件总线 ◀─ 状态快照 ◀─ 轴变换(入站) ◀─ 响应解析 ◀───────────┘
//! ```
//!
//! 共享状态放在 [`DriverShared`] 中，由调用方线程、轮询线程、程序执行线程共同持有。

use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::events::{DeviceEvent, EventBus};
use crate::program::GcodeProgram;
use crate::state::{AtomicDeviceState, DeviceState};
use crate::status::{
    DeviceCapabilities, DeviceStatus, EndstopDirection, GripperState, Position, TaughtPosition,
};
use crate::workers::{Worker, join_logged, sleep_while};
use arc_swap::ArcSwap;
use armlink_kinematics::{AxisTransform, JointAngles};
use armlink_protocol::{
    ArmCommand, Axis, AxisSet, AxisValues, Dialect, GrblSettings, ProtocolError, find_error_line, grbl,
    is_welcome_banner, parse_endstops, parse_linear_move,
};
use armlink_serial::{SerialConnector, SerialTransport, SystemConnector};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 开机欢迎语的收集窗口
pub(crate) const BANNER_WINDOW: Duration = Duration::from_millis(100);

/// GRBL `$H` 回零可能持续很久
const GRBL_HOMING_TIMEOUT: Duration = Duration::from_secs(60);

/// 从欢迎语识别出的固件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareKind {
    /// 机械臂固件（`Connected, please calibrate ...`）
    Legacy,
    Grbl,
    Unknown,
}

impl FirmwareKind {
    pub fn detect(banner: &str) -> Self {
        if is_welcome_banner(banner) {
            Self::Legacy
        } else if banner.contains("Grbl") {
            Self::Grbl
        } else {
            Self::Unknown
        }
    }

    fn dialect(self) -> Option<Dialect> {
        match self {
            Self::Legacy => Some(Dialect::Legacy),
            Self::Grbl => Some(Dialect::Grbl),
            Self::Unknown => None,
        }
    }
}

/// 驱动共享状态
pub(crate) struct DriverShared {
    pub(crate) config: DriverConfig,
    pub(crate) transport: SerialTransport,
    pub(crate) transform: AxisTransform,
    connector: Arc<dyn SerialConnector>,
    state: AtomicDeviceState,
    status: ArcSwap<DeviceStatus>,
    pub(crate) capabilities: ArcSwap<DeviceCapabilities>,
    pub(crate) grbl_settings: ArcSwap<GrblSettings>,
    pub(crate) events: EventBus,
    connected: AtomicBool,
    enabled: AtomicBool,
    calibrated: AtomicBool,
    pub(crate) paused: AtomicBool,
    pub(crate) diagnostics_active: AtomicBool,
    /// 当前任务（程序执行或示教回放）的取消标志
    active_job: Mutex<Option<Arc<AtomicBool>>>,
    /// GRBL 方言下跟踪的关节角
    pub(crate) joints: Mutex<JointAngles>,
}

impl DriverShared {
    pub(crate) fn id(&self) -> &str {
        &self.config.id
    }

    pub(crate) fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    pub(crate) fn state(&self) -> DeviceState {
        self.state.get(Ordering::Acquire)
    }

    /// 无条件切换状态
    pub(crate) fn set_state(&self, new: DeviceState) {
        let old = self.state.swap(new, Ordering::AcqRel);
        if old != new {
            self.state_changed(old, new);
        }
    }

    /// 仅当当前状态为 `from` 时切换到 `to`
    pub(crate) fn transition(&self, from: DeviceState, to: DeviceState) -> bool {
        if from == to {
            return self.state() == from;
        }
        let switched =
            self.state
                .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire);
        if switched {
            self.state_changed(from, to);
        }
        switched
    }

    /// 回到 Idle（Alarm 与 Disconnected 保持不变）
    pub(crate) fn settle_idle(&self) {
        loop {
            let current = self.state();
            if matches!(
                current,
                DeviceState::Alarm | DeviceState::Disconnected | DeviceState::Idle
            ) {
                return;
            }
            if self.transition(current, DeviceState::Idle) {
                return;
            }
        }
    }

    fn state_changed(&self, from: DeviceState, to: DeviceState) {
        self.update_status(|s| s.state = to);
        debug!("[{}] State {} -> {}", self.id(), from, to);
        self.events.publish(DeviceEvent::StateChanged { from, to });
    }

    pub(crate) fn update_status(&self, f: impl Fn(&mut DeviceStatus)) {
        self.status.rcu(|current| {
            let mut next = DeviceStatus::clone(current);
            f(&mut next);
            next
        });
    }

    pub(crate) fn status(&self) -> DeviceStatus {
        let mut status = DeviceStatus::clone(&self.status.load());
        status.state = self.state();
        status
    }

    /// 记录错误并进入 Alarm
    pub(crate) fn set_error(&self, message: String) {
        error!("[{}] {}", self.id(), message);
        self.update_status(|s| s.error_message = Some(message.clone()));
        self.set_state(DeviceState::Alarm);
        self.events.publish(DeviceEvent::Error(message));
    }

    /// 串口层错误视为连接异常，进入 Alarm；其他错误原样返回
    pub(crate) fn report<T>(&self, op: &str, result: Result<T, DriverError>) -> Result<T, DriverError> {
        if let Err(e @ DriverError::Serial(_)) = &result {
            self.set_error(format!("{} error: {}", op, e));
        }
        result
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_connected(&self) -> Result<(), DriverError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(DriverError::NotConnected)
        }
    }

    pub(crate) fn require_dialect(&self, required: Dialect) -> Result<(), DriverError> {
        if self.dialect() == required {
            Ok(())
        } else {
            Err(DriverError::UnsupportedDialect {
                required,
                actual: self.dialect(),
            })
        }
    }

    /// 写一行并读取响应（默认超时）
    pub(crate) fn exchange(&self, command: &str) -> Result<String, DriverError> {
        self.exchange_timeout(command, self.config.response_timeout())
    }

    /// 写一行并读取响应；响应中的运动确认会更新位置
    pub(crate) fn exchange_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, DriverError> {
        self.ensure_connected()?;
        let response = self.transport.write_and_read(command, timeout)?;
        self.absorb_move_response(&response);
        Ok(response)
    }

    pub(crate) fn write_no_response(&self, command: &str) -> Result<(), DriverError> {
        self.ensure_connected()?;
        self.transport.write_no_response(command)?;
        Ok(())
    }

    pub(crate) fn write_realtime(&self, byte: u8) -> Result<(), DriverError> {
        self.ensure_connected()?;
        self.transport.write_realtime(byte)?;
        Ok(())
    }

    /// 响应中的固件错误（GRBL 错误码翻译为说明文字）
    pub(crate) fn firmware_error(&self, response: &str) -> Option<String> {
        match self.dialect() {
            Dialect::Legacy => find_error_line(response).map(str::to_string),
            Dialect::Grbl => grbl::find_error_code(response)
                .map(|code| format!("error:{} ({})", code, grbl::error_message(code)))
                .or_else(|| {
                    grbl::find_alarm_code(response)
                        .map(|code| format!("ALARM:{} ({})", code, grbl::alarm_message(code)))
                }),
        }
    }

    /// 固件错误 → `FirmwareError`；GRBL 无响应 → `Timeout`
    ///
    /// Legacy 固件对部分命令不回复，空响应视为成功。
    pub(crate) fn check_response(&self, response: &str) -> Result<(), DriverError> {
        if let Some(message) = self.firmware_error(response) {
            return Err(DriverError::FirmwareError(message));
        }
        if self.dialect() == Dialect::Grbl && response.trim().is_empty() {
            return Err(DriverError::Timeout);
        }
        Ok(())
    }

    /// 解析 `INFO: LINEAR MOVE` 并整体更新位置（每条响应最多一个事件）
    fn absorb_move_response(&self, response: &str) {
        let Some(fw) = parse_linear_move(response) else {
            return;
        };
        let position = Position::from_axes(self.transform.map_incoming(fw));
        debug!(
            "[{}] Firmware position X={:.2} Y={:.2} Z={:.2} -> logical {}",
            self.id(),
            fw.x,
            fw.y,
            fw.z,
            position
        );
        self.set_position(position);
    }

    pub(crate) fn set_position(&self, position: Position) {
        self.update_status(|s| {
            s.position = position;
            s.work_position = position;
        });
        self.events.publish(DeviceEvent::PositionUpdated(position));
    }

    /// 发送逻辑坐标的绝对运动（软限位裁剪 + 轴变换）
    pub(crate) fn move_logical(
        &self,
        target: AxisValues<f64>,
        feed: u32,
    ) -> Result<String, DriverError> {
        if target.iter().any(|(_, v)| !v.is_finite()) {
            return Err(DriverError::InvalidInput(format!(
                "non-finite target {:?}",
                target
            )));
        }

        let (target, clamped) = self.transform.clamp_to_limits(target);
        if !clamped.is_empty() {
            warn!(
                "[{}] Limit clamp on {} (target: {})",
                self.id(),
                clamped,
                Position::from_axes(target)
            );
        }

        let fw = self.transform.map_outgoing(target);
        let command = ArmCommand::LinearMove { target: fw, feed };
        let response = self.exchange(&command.to_wire())?;
        self.check_response(&response)?;
        self.update_status(|s| s.feed_rate = feed as f64);

        if self.dialect() == Dialect::Grbl {
            self.confirm_grbl_target(fw);
        }
        Ok(response)
    }

    /// GRBL 没有运动回显，`ok` 之后按下发的固件坐标更新位置与关节角
    pub(crate) fn confirm_grbl_target(&self, fw: AxisValues<f64>) {
        *self.joints.lock() = JointAngles::from_grbl_axes(fw);
        self.set_position(Position::from_axes(self.transform.map_incoming(fw)));
    }

    /// 速度：Legacy 为 1-100 刻度，GRBL 为 mm/min（至少 1）
    pub(crate) fn feed_for(&self, speed: f64) -> u32 {
        match self.dialect() {
            Dialect::Legacy => ArmCommand::legacy_speed(speed),
            Dialect::Grbl => {
                if speed.is_finite() && speed >= 1.0 {
                    speed.round() as u32
                } else {
                    1
                }
            },
        }
    }

    /// `M119` → 逻辑轴限位状态
    pub(crate) fn check_endstops(&self) -> Result<AxisValues<bool>, DriverError> {
        let response = self.exchange(&ArmCommand::QueryEndstops.to_wire())?;
        if response.trim().is_empty() {
            return Err(DriverError::Timeout);
        }
        let fw = parse_endstops(&response)
            .ok_or_else(|| ProtocolError::UnexpectedResponse(response.clone()))?;
        let logical = self.transform.flags_incoming(fw);
        self.update_status(|s| s.endstop_states = Some(logical));
        Ok(logical)
    }

    /// 点动之后检查被移动轴的限位，更新阻挡方向
    fn check_endstop_after_jog(&self, axis: Axis, distance: f64) {
        let endstops = match self.check_endstops() {
            Ok(endstops) => endstops,
            Err(e) => {
                warn!("[{}] Endstop check after jog failed: {}", self.id(), e);
                return;
            },
        };

        let triggered = endstops[axis];
        let direction = EndstopDirection::of_distance(distance);
        if triggered {
            warn!(
                "[{}] Endstop active: {} {:?} direction blocked",
                self.id(),
                axis,
                direction
            );
        }
        self.update_status(|s| {
            if triggered {
                s.endstop_blocked.insert(axis, direction);
            } else {
                s.endstop_blocked.remove(&axis);
            }
        });
    }

    /// 开始新任务（取消之前的任务），返回其取消标志
    pub(crate) fn begin_job(&self) -> Arc<AtomicBool> {
        let flag = Arc::new(AtomicBool::new(true));
        if let Some(previous) = self.active_job.lock().replace(Arc::clone(&flag)) {
            previous.store(false, Ordering::Release);
        }
        flag
    }

    /// 取消当前任务
    pub(crate) fn cancel_job(&self) -> bool {
        match self.active_job.lock().take() {
            Some(flag) => {
                flag.store(false, Ordering::Release);
                true
            },
            None => false,
        }
    }

    /// 任务结束（只清除自己的标志）
    pub(crate) fn finish_job(&self, flag: &Arc<AtomicBool>) {
        let mut active = self.active_job.lock();
        if active.as_ref().is_some_and(|f| Arc::ptr_eq(f, flag)) {
            *active = None;
        }
        flag.store(false, Ordering::Release);
    }

    pub(crate) fn job_active(&self) -> bool {
        self.active_job
            .lock()
            .as_ref()
            .is_some_and(|f| f.load(Ordering::Acquire))
    }

    /// 轮询一次
    ///
    /// Legacy 固件没有状态查询，位置只来自运动响应，因此不访问串口。
    fn poll_once(&self) {
        match self.dialect() {
            Dialect::Legacy => {},
            Dialect::Grbl => {
                if let Err(e) = self.query_grbl_status() {
                    debug!("[{}] Status poll failed: {}", self.id(), e);
                }
            },
        }
    }
}

/// 机械臂驱动（对外 API）
///
/// 所有方法都接收 `&self`，可以放在 `Arc` 中跨线程共享。
/// 同一设备上的两个并发命令不会在线路上交错。
pub struct RobotArmDriver {
    pub(crate) shared: Arc<DriverShared>,
    poller: Mutex<Option<Worker>>,
    pub(crate) runner: Mutex<Option<JoinHandle<()>>>,
    pub(crate) program: Mutex<Option<Arc<GcodeProgram>>>,
    pub(crate) taught: Mutex<Vec<TaughtPosition>>,
}

impl RobotArmDriver {
    /// 使用真实串口创建驱动
    ///
    /// # 错误
    ///
    /// 机械结构或轴变换配置无效时返回错误。
    pub fn new(config: DriverConfig) -> Result<Self, DriverError> {
        Self::with_connector(config, Arc::new(SystemConnector))
    }

    /// 使用指定连接器创建驱动（测试使用模拟固件）
    pub fn with_connector(
        config: DriverConfig,
        connector: Arc<dyn SerialConnector>,
    ) -> Result<Self, DriverError> {
        config.validate()?;
        let transform = AxisTransform::new(config.transform.clone())?;
        let transport = SerialTransport::with_timing(config.dialect, config.transport_timing());
        let capabilities = DeviceCapabilities::robot_arm(config.transform.axis_limits);

        if !transform.config().is_identity_mapping() {
            info!("[{}] Axis mapping: {:?}", config.id, config.transform.axis_mapping);
        }

        let shared = DriverShared {
            config,
            transport,
            transform,
            connector,
            state: AtomicDeviceState::new(DeviceState::Disconnected),
            status: ArcSwap::from_pointee(DeviceStatus::default()),
            capabilities: ArcSwap::from_pointee(capabilities),
            grbl_settings: ArcSwap::from_pointee(GrblSettings::default()),
            events: EventBus::new(),
            connected: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
            calibrated: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            diagnostics_active: AtomicBool::new(false),
            active_job: Mutex::new(None),
            joints: Mutex::new(JointAngles::new(0.0, 0.0, 0.0)),
        };

        Ok(Self {
            shared: Arc::new(shared),
            poller: Mutex::new(None),
            runner: Mutex::new(None),
            program: Mutex::new(None),
            taught: Mutex::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &str {
        self.shared.id()
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn config(&self) -> &DriverConfig {
        &self.shared.config
    }

    pub fn dialect(&self) -> Dialect {
        self.shared.dialect()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    pub fn is_calibrated(&self) -> bool {
        self.shared.calibrated.load(Ordering::Acquire)
    }

    pub fn state(&self) -> DeviceState {
        self.shared.state()
    }

    /// 状态快照（不访问串口）
    pub fn status(&self) -> DeviceStatus {
        self.shared.status()
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities::clone(&self.shared.capabilities.load())
    }

    /// 订阅设备事件
    pub fn subscribe(&self) -> Receiver<DeviceEvent> {
        self.shared.events.subscribe()
    }

    // ==================== 连接 ====================

    /// 连接设备
    ///
    /// 打开串口 → 等待固件启动 → 读取欢迎语 → 方言握手 → Idle → 启动轮询。
    ///
    /// # 错误
    ///
    /// 失败时发布错误事件并断开，最终状态为 Disconnected，`error_message` 保留。
    pub fn connect(&self) -> Result<(), DriverError> {
        self.stop_polling();
        let shared = &self.shared;
        shared.set_state(DeviceState::Connecting);
        info!(
            "[{}] Connecting to {} @ {} bps ({} dialect)",
            shared.id(),
            shared.config.port,
            shared.config.baud_rate,
            shared.dialect()
        );

        match self.open_and_handshake() {
            Ok(()) => {
                shared.update_status(|s| s.error_message = None);
                shared.set_state(DeviceState::Idle);
                self.start_polling();
                info!("[{}] Connected ({})", shared.id(), shared.config.port);
                Ok(())
            },
            Err(e) => {
                shared.set_error(format!("Connection error: {}", e));
                self.disconnect();
                Err(e)
            },
        }
    }

    fn open_and_handshake(&self) -> Result<(), DriverError> {
        let shared = &self.shared;
        let config = &shared.config;
        shared.transport.open_with(
            shared.connector.as_ref(),
            &config.port,
            config.baud_rate,
            config.response_timeout(),
        )?;
        shared.connected.store(true, Ordering::Release);

        std::thread::sleep(config.timing.boot_settle());
        let banner = shared.transport.drain_input(BANNER_WINDOW)?;
        let firmware = FirmwareKind::detect(&banner);
        match firmware.dialect() {
            Some(d) if d == config.dialect => info!("[{}] Firmware detected: {:?}", shared.id(), firmware),
            Some(d) => warn!(
                "[{}] Banner looks like {} firmware but the {} dialect is configured",
                shared.id(),
                d,
                config.dialect
            ),
            None => info!("[{}] Unrecognised banner: {:?}", shared.id(), banner),
        }

        match config.dialect {
            Dialect::Legacy => self.handshake_legacy(),
            Dialect::Grbl => shared.handshake_grbl(firmware),
        }
    }

    /// 固件要求上电后校准机械坐标：`G92` 将当前位置设为零点
    fn handshake_legacy(&self) -> Result<(), DriverError> {
        let shared = &self.shared;
        shared.calibrated.store(false, Ordering::Release);
        shared.write_no_response(&ArmCommand::ZeroPosition.to_wire())?;
        std::thread::sleep(shared.config.timing.zero_settle());
        shared.update_status(|s| {
            s.position = Position::default();
            s.work_position = Position::default();
        });
        shared.calibrated.store(true, Ordering::Release);
        Ok(())
    }

    /// 断开连接（停止轮询与程序执行，关闭串口）
    pub fn disconnect(&self) {
        self.stop_runner();
        self.stop_polling();
        let shared = &self.shared;
        shared.transport.close();
        shared.connected.store(false, Ordering::Release);
        shared.enabled.store(false, Ordering::Release);
        shared.set_state(DeviceState::Disconnected);
        info!("[{}] Disconnected", shared.id());
    }

    /// 重新连接（USB 拔插后句柄失效时使用）
    pub fn reconnect(&self) -> Result<(), DriverError> {
        info!("[{}] Reconnecting {}", self.id(), self.shared.config.port);
        self.stop_polling();
        self.shared.transport.close();
        self.shared.connected.store(false, Ordering::Release);
        self.connect()
    }

    // ==================== 轮询 ====================

    fn start_polling(&self) {
        let mut poller = self.poller.lock();
        if poller.is_some() {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let interval = shared.config.timing.poll_interval(shared.dialect());
        let name = format!("armlink-poll-{}", shared.id());
        match Worker::spawn(name, move |running| {
            while running.load(Ordering::Acquire) && shared.is_connected() {
                if !shared.diagnostics_active.load(Ordering::Acquire) {
                    shared.poll_once();
                }
                if !sleep_while(&running, interval) {
                    break;
                }
            }
        }) {
            Ok(worker) => *poller = Some(worker),
            Err(e) => warn!("[{}] Failed to start status polling: {}", self.id(), e),
        }
    }

    fn stop_polling(&self) {
        if let Some(worker) = self.poller.lock().take() {
            worker.stop();
        }
    }

    /// 取消当前任务并等待程序线程退出
    pub(crate) fn stop_runner(&self) {
        self.shared.cancel_job();
        self.shared.paused.store(false, Ordering::Release);
        if let Some(handle) = self.runner.lock().take() {
            join_logged(handle, "Program");
        }
    }

    // ==================== 使能 ====================

    /// 电机使能（`M17`）
    pub fn enable(&self) -> Result<(), DriverError> {
        let shared = &self.shared;
        let result = shared
            .exchange(&ArmCommand::MotorsOn.to_wire())
            .and_then(|r| shared.check_response(&r));
        shared.report("Enable", result)?;
        shared.enabled.store(true, Ordering::Release);
        info!("[{}] Motors enabled", shared.id());
        Ok(())
    }

    /// 电机释放（`M84`）
    pub fn disable(&self) -> Result<(), DriverError> {
        let shared = &self.shared;
        let result = shared
            .exchange(&ArmCommand::MotorsOff.to_wire())
            .and_then(|r| shared.check_response(&r));
        shared.report("Disable", result)?;
        shared.enabled.store(false, Ordering::Release);
        info!("[{}] Motors disabled", shared.id());
        Ok(())
    }

    // ==================== 运动 ====================

    /// 回零
    ///
    /// Legacy：`G1 X0 Y0 Z0 F50`；GRBL：`$H`。固件报错时进入 Alarm。
    ///
    /// # 参数
    ///
    /// - `axes`: 两种固件都只支持全部轴一起回零，指定的轴只记录日志
    pub fn home(&self, axes: Option<AxisSet>) -> Result<(), DriverError> {
        let shared = &self.shared;
        shared.ensure_connected()?;
        if let Some(axes) = axes
            && axes.len() < Axis::ALL.len()
        {
            debug!("[{}] Homing all axes (requested: {})", shared.id(), axes);
        }
        let entered = shared.transition(DeviceState::Idle, DeviceState::Homing);

        let result = match shared.dialect() {
            Dialect::Legacy => shared.exchange(&ArmCommand::MoveHome.to_wire()),
            Dialect::Grbl => shared.exchange_timeout(grbl::HOME, GRBL_HOMING_TIMEOUT),
        }
        .and_then(|response| {
            shared.check_response(&response)?;
            Ok(response)
        });

        match result {
            Ok(_) => {
                if entered {
                    shared.transition(DeviceState::Homing, DeviceState::Idle);
                }
                Ok(())
            },
            Err(e) => {
                shared.set_error(format!("Homing error: {}", e));
                Err(e)
            },
        }
    }

    /// 点动：只移动一个逻辑轴
    ///
    /// Legacy 方言以当前位置为基准计算绝对目标（其余轴保持不变，避免电机抖动），
    /// 经软限位裁剪和轴变换后发送，随后用 `M119` 检查被移动轴的限位。
    /// GRBL 方言发送 `$J=G91` 相对点动。
    ///
    /// # 参数
    ///
    /// - `distance`: 距离（度），负数为反方向
    /// - `feed`: Legacy 为 1-100 速度刻度，GRBL 为 mm/min
    pub fn jog(&self, axis: Axis, distance: f64, feed: f64) -> Result<(), DriverError> {
        let shared = &self.shared;
        shared.ensure_connected()?;
        if !distance.is_finite() {
            return Err(DriverError::InvalidInput(format!(
                "non-finite jog distance {}",
                distance
            )));
        }

        let entered = shared.transition(DeviceState::Idle, DeviceState::Jog);
        let result = match shared.dialect() {
            Dialect::Legacy => self.jog_legacy(axis, distance, feed),
            Dialect::Grbl => self.jog_grbl(axis, distance, feed),
        };
        if entered {
            shared.transition(DeviceState::Jog, DeviceState::Idle);
        }
        shared.report("Jog", result)
    }

    fn jog_legacy(&self, axis: Axis, distance: f64, feed: f64) -> Result<(), DriverError> {
        let shared = &self.shared;
        let current = shared.status().position.axes();
        let target = current.with(axis, current[axis] + distance);
        shared.move_logical(target, ArmCommand::legacy_speed(feed))?;
        shared.check_endstop_after_jog(axis, distance);
        Ok(())
    }

    fn jog_grbl(&self, axis: Axis, distance: f64, feed: f64) -> Result<(), DriverError> {
        let shared = &self.shared;
        let (fw_axis, fw_distance) = shared.transform.map_outgoing_delta(axis, distance);
        let command = grbl::jog_command(fw_axis, fw_distance, shared.feed_for(feed) as f64);
        let response = shared.exchange(&command)?;
        shared.check_response(&response)
    }

    /// 停止点动
    ///
    /// Legacy 固件不支持进给保持，运动会执行完毕；GRBL 发送 jog cancel。
    pub fn jog_stop(&self) -> Result<(), DriverError> {
        match self.dialect() {
            Dialect::Legacy => Ok(()),
            Dialect::Grbl => self.shared.write_realtime(grbl::JOG_CANCEL),
        }
    }

    /// 绝对运动到逻辑坐标（软限位裁剪）
    pub fn move_to(&self, x: f64, y: f64, z: f64, speed: f64) -> Result<(), DriverError> {
        let shared = &self.shared;
        let feed = shared.feed_for(speed);
        let result = shared.move_logical(AxisValues::new(x, y, z), feed);
        shared.report("Move", result).map(|_| ())
    }

    // ==================== 末端执行器 ====================

    fn effector_command(&self, command: ArmCommand, op: &str) -> Result<(), DriverError> {
        let shared = &self.shared;
        let result = shared
            .exchange(&command.to_wire())
            .and_then(|r| shared.check_response(&r));
        shared.report(op, result)
    }

    /// 夹爪闭合（舵机 90°）
    pub fn gripper_on(&self) -> Result<(), DriverError> {
        self.effector_command(ArmCommand::GripperClose, "Gripper")?;
        self.shared
            .update_status(|s| s.gripper_state = GripperState::Closed);
        info!("[{}] Gripper closed", self.id());
        Ok(())
    }

    /// 夹爪张开（舵机 0°）
    pub fn gripper_off(&self) -> Result<(), DriverError> {
        self.effector_command(ArmCommand::GripperOpen, "Gripper")?;
        self.shared
            .update_status(|s| s.gripper_state = GripperState::Open);
        info!("[{}] Gripper opened", self.id());
        Ok(())
    }

    pub fn sucker_on(&self) -> Result<(), DriverError> {
        self.effector_command(ArmCommand::SuckerOn, "Sucker")?;
        self.shared.update_status(|s| s.sucker_state = true);
        info!("[{}] Sucker on", self.id());
        Ok(())
    }

    pub fn sucker_off(&self) -> Result<(), DriverError> {
        self.effector_command(ArmCommand::SuckerOff, "Sucker")?;
        self.shared.update_status(|s| s.sucker_state = false);
        info!("[{}] Sucker off", self.id());
        Ok(())
    }

    // ==================== 校准 ====================

    /// 校准：手动把机械臂摆到零位后调用，`G92` 把当前位置设为零点
    pub fn calibrate(&self) -> Result<(), DriverError> {
        let shared = &self.shared;
        shared.ensure_connected()?;
        let entered = shared.transition(DeviceState::Idle, DeviceState::Homing);
        info!("[{}] Calibrating", shared.id());

        let result = shared.write_no_response(&ArmCommand::ZeroPosition.to_wire());
        if let Err(e) = result {
            shared.set_error(format!("Calibration error: {}", e));
            return Err(e);
        }
        std::thread::sleep(shared.config.timing.zero_settle());

        shared.set_position(Position::default());
        shared.calibrated.store(true, Ordering::Release);
        if entered {
            shared.transition(DeviceState::Homing, DeviceState::Idle);
        }
        info!("[{}] Calibration done", shared.id());
        Ok(())
    }

    /// 查询限位开关（`M119`），结果按逻辑轴返回并写入状态
    ///
    /// 不要在运动过程中调用。
    pub fn check_endstops(&self) -> Result<AxisValues<bool>, DriverError> {
        self.shared.check_endstops()
    }

    // ==================== 原始 G-code ====================

    /// 发送一行原始 G-code（应用轴映射，不做软限位裁剪）
    ///
    /// # 返回
    ///
    /// 固件响应；出错时以 `"error: "` 开头，未连接时为 `"error: not connected"`。
    pub fn send_gcode(&self, gcode: &str) -> String {
        let shared = &self.shared;
        if !shared.is_connected() {
            return "error: not connected".to_string();
        }

        let mapped = shared.transform.remap_gcode(gcode);
        match shared.exchange(&mapped) {
            Ok(response) => match shared.firmware_error(&response) {
                Some(message) => match shared.dialect() {
                    Dialect::Legacy => format!("error: {}", response),
                    Dialect::Grbl => format!("error: {}", message),
                },
                None => response,
            },
            Err(e) => format!("error: {}", e),
        }
    }
}

impl Drop for RobotArmDriver {
    fn drop(&mut self) {
        self.shared.cancel_job();
        if let Some(handle) = self.runner.get_mut().take() {
            join_logged(handle, "Program");
        }
        if let Some(worker) = self.poller.get_mut().take() {
            worker.stop();
        }
        self.shared.transport.close();
    }
}
