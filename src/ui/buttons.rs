use serenity::{
    all::ButtonStyle,
    builder::{CreateActionRow, CreateButton},
};

use super::status::Controls;

/// IDs personalizados para los botones
pub mod button_ids {
    pub const PAUSE: &str = "music_pause";
    pub const SKIP: &str = "music_skip";
    pub const STOP: &str = "music_stop";
}

/// Acción asociada a un botón del mensaje "Now playing"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    TogglePause,
    Skip,
    Stop,
}

impl ButtonAction {
    pub fn from_custom_id(id: &str) -> Option<Self> {
        match id {
            button_ids::PAUSE => Some(Self::TogglePause),
            button_ids::SKIP => Some(Self::Skip),
            button_ids::STOP => Some(Self::Stop),
            _ => None,
        }
    }
}

/// Crea la fila de controles; el botón de skip solo aparece si hay cola
pub fn control_row(controls: Controls) -> CreateActionRow {
    let (pause_label, pause_emoji) = if controls.paused {
        ("Resume", '▶')
    } else {
        ("Pause", '⏸')
    };

    let mut buttons = vec![CreateButton::new(button_ids::PAUSE)
        .label(pause_label)
        .emoji(pause_emoji)
        .style(ButtonStyle::Primary)];

    if controls.can_skip {
        buttons.push(
            CreateButton::new(button_ids::SKIP)
                .label("Skip")
                .emoji('⏭')
                .style(ButtonStyle::Secondary),
        );
    }

    buttons.push(
        CreateButton::new(button_ids::STOP)
            .label("Stop")
            .emoji('⏹')
            .style(ButtonStyle::Danger),
    );

    CreateActionRow::Buttons(buttons)
}

/// Filas de componentes para un mensaje; vacío significa "quitar botones"
pub fn components_for(controls: Option<Controls>) -> Vec<CreateActionRow> {
    controls.map(control_row).into_iter().collect()
}
