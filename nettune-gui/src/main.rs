//! NetTune GUI - Linux网络调优界面
//!
//! 选择网卡、调整卸载/省电/缓冲区/拥塞控制，一键应用或还原为启动时的状态

use nettune_core::platform::{
    create_capabilities, has_admin_privileges, list_interfaces, missing_tools, platform_name,
};
use nettune_core::{
    AppConfig, ApplyResult, BufferTier, CongestionAlgorithm, DesiredState, InterfaceSnapshot,
    PowerSaveMechanism, Selection, TuningSession,
};

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

/// 后台线程消息
enum BgMessage {
    Selected(Selection),
    Applied(Result<ApplyResult, String>),
    Reset(Result<ApplyResult, String>),
}

fn main() -> eframe::Result<()> {
    tracing_subscriber::fmt::init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([600.0, 520.0])
            .with_min_inner_size([520.0, 420.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Linux Network Optimizer",
        options,
        Box::new(|cc| Ok(Box::new(NetTuneApp::new(cc)))),
    )
}

/// 主应用状态
struct NetTuneApp {
    session: Arc<TuningSession>,
    interfaces: Vec<String>,
    current_interface: Option<String>,
    snapshot: Option<Arc<InterfaceSnapshot>>,
    desired: DesiredState,
    globals_seeded: bool,

    is_admin: bool,
    missing_tools: Vec<&'static str>,
    status_message: String,
    /// 带时间戳的操作记录
    log: Vec<String>,

    // 持久化配置
    app_config: AppConfig,

    // 后台操作
    bg_receiver: Receiver<BgMessage>,
    bg_sender: Sender<BgMessage>,
    is_busy: bool,
}

impl NetTuneApp {
    fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        // 加载持久化配置
        let app_config = AppConfig::load().unwrap_or_default();
        let session = Arc::new(TuningSession::new(create_capabilities(&app_config)));
        let (bg_sender, bg_receiver) = channel();

        let mut app = Self {
            session,
            interfaces: Vec::new(),
            current_interface: None,
            snapshot: None,
            desired: app_config.profile.clone(),
            globals_seeded: false,
            is_admin: has_admin_privileges(),
            missing_tools: missing_tools(),
            status_message: String::new(),
            log: Vec::new(),
            app_config,
            bg_receiver,
            bg_sender,
            is_busy: false,
        };

        match list_interfaces() {
            Ok(interfaces) => app.interfaces = interfaces,
            Err(e) => app.push_log(format!("Failed to list network interfaces: {}", e)),
        }

        let preferred = app
            .app_config
            .interface
            .clone()
            .filter(|name| app.interfaces.contains(name))
            .or_else(|| app.interfaces.first().cloned());
        if let Some(name) = preferred {
            app.select_interface_async(name);
        }
        app
    }

    fn push_log(&mut self, line: String) {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        tracing::info!("{}", line);
        self.log.push(format!("[{}] {}", stamp, line));
        self.status_message = line;
    }

    /// 在后台线程采集/切换网卡（首次选择会执行外部命令）
    fn select_interface_async(&mut self, name: String) {
        if self.is_busy {
            return;
        }
        self.is_busy = true;
        self.current_interface = Some(name.clone());
        self.status_message = format!("Detecting settings for {}...", name);

        let session = Arc::clone(&self.session);
        let sender = self.bg_sender.clone();
        std::thread::spawn(move || {
            let selection = session.select_interface(&name);
            let _ = sender.send(BgMessage::Selected(selection));
        });
    }

    fn apply_async(&mut self) {
        if self.is_busy {
            return;
        }
        self.is_busy = true;
        self.status_message = "Applying settings...".into();

        let session = Arc::clone(&self.session);
        let sender = self.bg_sender.clone();
        let desired = self.desired.clone();
        std::thread::spawn(move || {
            let result = session.apply(&desired).map_err(|e| e.to_string());
            let _ = sender.send(BgMessage::Applied(result));
        });
    }

    fn reset_async(&mut self) {
        if self.is_busy {
            return;
        }
        self.is_busy = true;
        self.status_message = "Restoring original settings...".into();

        let session = Arc::clone(&self.session);
        let sender = self.bg_sender.clone();
        std::thread::spawn(move || {
            let result = session.reset().map_err(|e| e.to_string());
            let _ = sender.send(BgMessage::Reset(result));
        });
    }

    /// 处理后台消息
    fn process_bg_messages(&mut self) {
        while let Ok(msg) = self.bg_receiver.try_recv() {
            self.is_busy = false;
            match msg {
                BgMessage::Selected(selection) => self.on_selected(selection),
                BgMessage::Applied(result) => self.on_finished("Apply", result),
                BgMessage::Reset(result) => {
                    let succeeded = matches!(&result, Ok(r) if r.failed.is_empty());
                    self.on_finished("Reset", result);
                    if succeeded {
                        self.reload_from_snapshot();
                    }
                }
            }
        }
    }

    fn on_selected(&mut self, selection: Selection) {
        for warning in &selection.warnings {
            self.push_log(format!("Warning: {}", warning));
        }
        if !self.globals_seeded {
            self.desired = DesiredState::from_globals(&selection.global);
            self.globals_seeded = true;
        }
        self.desired.adopt_interface(&selection.snapshot);
        self.snapshot = Some(selection.snapshot);
        self.status_message =
            format!("Interface {} ready - {}", selection.interface, platform_name());

        if self.app_config.interface.as_deref() != Some(selection.interface.as_str()) {
            self.app_config.interface = Some(selection.interface);
            self.save_config();
        }
    }

    fn on_finished(&mut self, action: &str, result: Result<ApplyResult, String>) {
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                self.push_log(format!("{} failed: {}", action, e));
                return;
            }
        };

        for (field, failure) in &result.failed {
            self.push_log(format!("{} {}: {}", action, field, failure));
        }
        for field in &result.skipped {
            self.push_log(format!("{} {}: original value unknown, not reset", action, field));
        }
        if result.power_save_mechanism == Some(PowerSaveMechanism::ConfigFallback) {
            self.push_log("Power saving disabled via NetworkManager config".into());
        }

        if result.is_complete() {
            self.push_log(format!("{}: all {} settings succeeded", action, result.succeeded.len()));
        } else {
            self.push_log(format!(
                "{}: partial success ({} ok, {} failed, {} skipped)",
                action,
                result.succeeded.len(),
                result.failed.len(),
                result.skipped.len()
            ));
        }

        if action == "Apply" {
            self.app_config.profile = self.desired.clone();
            self.save_config();
        }
    }

    /// 还原后界面回到快照描述的状态
    fn reload_from_snapshot(&mut self) {
        let (Some(snapshot), Some(global)) =
            (self.snapshot.clone(), self.session.global_snapshot())
        else {
            return;
        };
        let mut desired = DesiredState::from_globals(&global);
        desired.adopt_interface(&snapshot);
        self.desired = desired;
    }

    fn save_config(&mut self) {
        if let Err(e) = self.app_config.save() {
            self.push_log(format!("Failed to save config: {}", e));
        }
    }
}

impl eframe::App for NetTuneApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.process_bg_messages();

        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if self.is_busy {
                    ui.spinner();
                }
                ui.label(&self.status_message);
            });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("Linux Network Optimizer");

            if !self.is_admin {
                ui.colored_label(
                    egui::Color32::YELLOW,
                    "Not running as root: changes will likely fail.",
                );
            }
            if !self.missing_tools.is_empty() {
                ui.colored_label(
                    egui::Color32::YELLOW,
                    format!("Missing tools: {}", self.missing_tools.join(", ")),
                );
            }
            ui.add_space(8.0);

            self.show_interface_selector(ui);
            ui.add_space(8.0);

            ui.add_enabled_ui(!self.is_busy && self.snapshot.is_some(), |ui| {
                self.show_controls(ui);
            });

            ui.add_space(12.0);
            ui.separator();
            egui::ScrollArea::vertical().stick_to_bottom(true).show(ui, |ui| {
                for line in &self.log {
                    ui.monospace(line);
                }
            });
        });

        if self.is_busy {
            ctx.request_repaint_after(Duration::from_millis(100));
        }
    }
}

impl NetTuneApp {
    fn show_interface_selector(&mut self, ui: &mut egui::Ui) {
        let mut chosen = None;
        ui.horizontal(|ui| {
            ui.label("Select Network Interface:");
            let selected = self.current_interface.clone().unwrap_or_else(|| "-".into());
            ui.add_enabled_ui(!self.is_busy, |ui| {
                egui::ComboBox::from_id_salt("interface_selector")
                    .selected_text(selected)
                    .show_ui(ui, |ui| {
                        for name in &self.interfaces {
                            let is_current =
                                self.current_interface.as_deref() == Some(name.as_str());
                            if ui.selectable_label(is_current, name).clicked() && !is_current {
                                chosen = Some(name.clone());
                            }
                        }
                    });
            });
        });
        if let Some(name) = chosen {
            self.select_interface_async(name);
        }
    }

    fn show_controls(&mut self, ui: &mut egui::Ui) {
        ui.group(|ui| {
            ui.label("Offloading Options (Disable for lower latency)");
            ui.checkbox(&mut self.desired.disable_tso, "Disable TSO");
            ui.checkbox(&mut self.desired.disable_gso, "Disable GSO");
            ui.checkbox(&mut self.desired.disable_gro, "Disable GRO");
        });

        // 不支持省电的网卡上该选项不可用
        let power_save_applicable =
            self.snapshot.as_ref().is_some_and(|s| s.power_save_applicable());
        ui.add_enabled(
            power_save_applicable,
            egui::Checkbox::new(
                &mut self.desired.disable_power_save,
                "Disable Power Saving (for better responsiveness)",
            ),
        );

        ui.group(|ui| {
            ui.label("Buffer Sizes (Adjust based on usage)");
            ui.horizontal(|ui| {
                let mut tier = self.desired.buffer_tier.get();
                let slider = egui::Slider::new(&mut tier, BufferTier::MIN..=BufferTier::MAX)
                    .show_value(false);
                if ui.add(slider).changed() {
                    self.desired.buffer_tier = BufferTier::new(i64::from(tier));
                }
                ui.label(self.desired.buffer_tier.label());
            });
        });

        ui.horizontal(|ui| {
            ui.label("TCP Congestion Control:");
            egui::ComboBox::from_id_salt("congestion_selector")
                .selected_text(self.desired.congestion_algorithm.as_str())
                .show_ui(ui, |ui| {
                    for algo in CongestionAlgorithm::ALL {
                        ui.selectable_value(
                            &mut self.desired.congestion_algorithm,
                            algo,
                            algo.as_str(),
                        );
                    }
                });
        });

        ui.add_space(8.0);
        ui.horizontal(|ui| {
            if ui.button("Apply").clicked() {
                self.apply_async();
            }
            if ui.button("Reset to Defaults").clicked() {
                self.reset_async();
            }
        });
    }
}
