mod click;
mod link;
mod login_attempt;

pub use click::{Click, ClickStats, CountryStat, NewClick};
pub use link::{Link, LinkWithClicks, NewLink};
pub use login_attempt::{LoginAttempt, NewLoginAttempt};
