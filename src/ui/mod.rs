pub mod buttons;
pub mod now_playing;
pub mod status;
