//! Emoji used across the terminal UI, with ASCII fallbacks.

use console::Emoji;

pub static CHECK: Emoji<'_, '_> = Emoji("\u{2705} ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("\u{274C} ", "[ERR]");
pub static SKIP: Emoji<'_, '_> = Emoji("\u{23ED}\u{FE0F}  ", "[SKIP]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("\u{2728} ", "*");
pub static RUNNING: Emoji<'_, '_> = Emoji("\u{25B6}\u{FE0F}  ", "[>]");
pub static WARNING: Emoji<'_, '_> = Emoji("\u{26A0}\u{FE0F}  ", "[!]");
pub static CLOCK: Emoji<'_, '_> = Emoji("\u{23F1}\u{FE0F}  ", "[T]");
pub static TOOL: Emoji<'_, '_> = Emoji("\u{1F527} ", "[tool]");
pub static THINKING: Emoji<'_, '_> = Emoji("\u{1F4AD} ", "...");
pub static LINK: Emoji<'_, '_> = Emoji("\u{1F517} ", "->");
