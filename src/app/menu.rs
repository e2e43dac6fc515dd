use eframe::egui::{self, Color32, Key};

use crate::{async_task::AsyncRefTask, storage::StoredRecord};

const ICON_SAVE: &str = "\u{1F4BE}";

impl super::VideoAnnotatorApp {
    pub(super) fn menu_ui(&mut self, ui: &mut egui::Ui) {
        ui.label("Select Name:");
        egui::ComboBox::from_id_salt("name_selector").show_index(
            ui,
            &mut self.selected_name,
            self.names.len(),
            |x| self.names.get(x).map(|x| x.as_str()).unwrap_or(""),
        );
        ui.label("Left click: positive, right click: negative");
        ui.separator();

        let is_dirty = self.controller.store().read().is_dirty();
        ui.horizontal(|ui| {
            ui.label("Records List:");
            if is_dirty {
                ui.colored_label(Color32::RED, "Unsaved Changes");
            } else {
                ui.colored_label(Color32::GREEN, "All changes saved");
            }
        });

        let records = self
            .controller
            .store()
            .read()
            .records()
            .map(|r| {
                (
                    r.frame(),
                    r.name().to_string(),
                    r.positive_points().len(),
                    r.negative_points().len(),
                )
            })
            .collect::<Vec<_>>();
        let current_frame = self.controller.current_frame();
        let mut jump_to = None;
        let mut delete = None;
        egui::ScrollArea::vertical()
            .max_height(ui.available_height() - 80.0)
            .show(ui, |ui| {
                for (frame, name, positive, negative) in records {
                    ui.horizontal(|ui| {
                        if ui
                            .selectable_label(
                                frame == current_frame,
                                format!("{name} at {frame} +{positive} -{negative}"),
                            )
                            .clicked()
                        {
                            jump_to = Some(frame);
                        }
                        if ui.button("Delete").clicked() {
                            delete = Some((frame, name.clone()));
                        }
                    });
                }
            });
        if let Some(frame) = jump_to {
            self.set_frame(frame);
        }
        if let Some((frame, name)) = delete {
            self.controller.delete_record(frame, &name);
        }

        ui.separator();
        let last_save = self.save_job.data();
        let is_saving = last_save.is_none();
        if let Some(Err(e)) = last_save {
            ui.colored_label(Color32::RED, format!("Error during save: {e}"));
            if !is_dirty {
                self.controller.store().write().mark_dirty();
            }
        }
        let save_clicked = ui
            .add_enabled(
                is_dirty && !is_saving,
                egui::Button::new(format!("{ICON_SAVE} Save Records")),
            )
            .on_hover_text("Save (cmd + S)")
            .clicked();
        let save_pressed =
            is_dirty && !is_saving && ui.input(|i| i.modifiers.command && i.key_pressed(Key::S));
        if save_clicked || save_pressed {
            self.save(ui.ctx().clone());
        }

        ui.label(format!("sam: {}", self.status));
        if let Some(error) = &self.error {
            ui.colored_label(Color32::RED, error);
        }
    }

    fn save(&mut self, ctx: egui::Context) {
        let records = {
            let mut database = self.controller.store().write();
            database.mark_saved();
            StoredRecord::collect(&database)
        };
        self.save_job = AsyncRefTask::new(
            self.record_file
                .save_in_background(records, move || ctx.request_repaint()),
        );
    }
}
