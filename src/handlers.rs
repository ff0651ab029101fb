// /src/handlers.rs
//! Built-in configuration commands of the gate controller.

use heapless::{String, Vec};

use crate::config::{ParamKind, is_private, kind_of};
use crate::constants::{
    MAX_PARAM1_LENGTH, MAX_PARAM2_LENGTH, MAX_PHONE_COUNT, MAX_PHONE_LENGTH, NO_USER_STR, NOTIFICATION_QUEUE_DEPTH,
    PARAM_KEY_LENGTH, PARAM_VALUE_LENGTH, SMS_TEXT_LENGTH,
};
use crate::custom_strings::{format_bounded, is_phone_number, is_valid_text, pack_lines};
use crate::dispatcher::{Access, Command, Dispatcher, HandlerContext};
use crate::error::{ConfigError, HandlerError, RightsError};
use crate::rights::{RIGHTS_STRING_LENGTH, Right, RightSet};

/// Wide enough for `  <phone> : <tags>` and `<key> = <value>`.
const LINE_LENGTH: usize = max(
    2 + MAX_PHONE_LENGTH + 3 + RIGHTS_STRING_LENGTH,
    PARAM_KEY_LENGTH + 3 + PARAM_VALUE_LENGTH,
);

type Line = String<LINE_LENGTH>;

const fn max(a: usize, b: usize) -> usize {
    if a > b { a } else { b }
}

/// Registers SAVE, UADD, UDEL, ULIST, RVIEW, RADD, RDEL, PLIST and PSET, all
/// restricted to admins.
pub fn register_gate_handlers(dispatcher: &mut Dispatcher) -> Result<(), ConfigError> {
    dispatcher.register("SAVE", Access::Admin, save_config)?;
    dispatcher.register("UADD", Access::Admin, user_add)?;
    dispatcher.register("UDEL", Access::Admin, user_del)?;
    dispatcher.register("ULIST", Access::Admin, user_list)?;
    dispatcher.register("RVIEW", Access::Admin, right_view)?;
    dispatcher.register("RADD", Access::Admin, right_add)?;
    dispatcher.register("RDEL", Access::Admin, right_del)?;
    dispatcher.register("PLIST", Access::Admin, param_list)?;
    dispatcher.register("PSET", Access::Admin, param_set)?;
    Ok(())
}

fn require_add_user(ctx: &HandlerContext<'_>, command: &Command) -> Result<(), HandlerError> {
    if ctx.rights.has_right(&command.sender, Right::AddUser) {
        Ok(())
    } else {
        Err(HandlerError::business(format_args!("Requires the ADD_USER right")))
    }
}

/// Queues `lines` packed in SMS-sized messages. The queue drains from the
/// back, so the messages are pushed last first.
fn reply_lines<'a>(ctx: &mut HandlerContext<'_>, command: &Command, lines: impl IntoIterator<Item = &'a str>) {
    let messages = pack_lines::<SMS_TEXT_LENGTH, NOTIFICATION_QUEUE_DEPTH>(lines);
    for message in messages.iter().rev() {
        ctx.reply(command, message);
    }
}

/// `SAVE[,REBOOT]`
fn save_config(ctx: &mut HandlerContext<'_>, command: &Command) -> Result<(), HandlerError> {
    ctx.rights.save(ctx.store)?;
    if command.param1().is_some_and(|param| param.eq_ignore_ascii_case("REBOOT")) {
        info!("Reboot requested by {}", command.sender);
        ctx.reboot_requested = true;
    }
    Ok(())
}

/// `UADD,<phone>`
fn user_add(ctx: &mut HandlerContext<'_>, command: &Command) -> Result<(), HandlerError> {
    require_add_user(ctx, command)?;
    let phone = command.param1().unwrap_or("");
    if !is_phone_number(phone) {
        return Err(HandlerError::from(RightsError::InvalidPhone));
    }
    ctx.rights.add_user(phone)?;
    info!("{} added {}", command.sender, phone);
    Ok(())
}

/// `UDEL,<phone>`
fn user_del(ctx: &mut HandlerContext<'_>, command: &Command) -> Result<(), HandlerError> {
    require_add_user(ctx, command)?;
    let phone = command.param1().unwrap_or("");
    ctx.rights.delete(&command.sender, phone)?;
    info!("{} deleted {}", command.sender, phone);
    Ok(())
}

/// `ULIST`
fn user_list(ctx: &mut HandlerContext<'_>, command: &Command) -> Result<(), HandlerError> {
    require_add_user(ctx, command)?;
    let mut lines: Vec<Line, { MAX_PHONE_COUNT + 2 }> = Vec::new();
    let _ = lines.push(format_bounded(format_args!("Admins:")));
    for (phone, rights) in ctx.rights.admins().iter() {
        let _ = lines.push(format_bounded(format_args!("  {} : {}", phone, rights.to_spaced())));
    }
    let _ = lines.push(format_bounded(format_args!("Users:")));
    for (phone, rights) in ctx.rights.users().iter() {
        let _ = lines.push(format_bounded(format_args!("  {} : {}", phone, rights.to_spaced())));
    }
    reply_lines(ctx, command, lines.iter().map(|line| line.as_str()));
    Ok(())
}

/// `RVIEW,<phone>`
fn right_view(ctx: &mut HandlerContext<'_>, command: &Command) -> Result<(), HandlerError> {
    let phone = command.param1().unwrap_or("");
    if !is_phone_number(phone) {
        return Err(HandlerError::from(RightsError::InvalidPhone));
    }
    match ctx.rights.rights_of(phone) {
        Some(rights) => ctx.reply(command, &rights.to_spaced()),
        None => ctx.reply(command, NO_USER_STR),
    }
    Ok(())
}

/// Checks a RADD/RDEL request and returns the target and the rights named.
fn rights_change<'c>(ctx: &HandlerContext<'_>, command: &'c Command) -> Result<(&'c str, RightSet), HandlerError> {
    let target = command.param1().unwrap_or("");
    let Some(list) = command.param2() else {
        return Err(HandlerError::business(format_args!("missing param!")));
    };
    if ctx.rights.tier_of(target).is_none() {
        return Err(HandlerError::Denied);
    }
    ctx.rights
        .authorize_modification(&command.sender, target, RightSet::EMPTY)?;

    let list: String<MAX_PARAM2_LENGTH> = crate::custom_strings::to_upper(list)
        .ok_or_else(|| HandlerError::business(format_args!("missing param!")))?;
    let changes = RightSet::parse_list(&list)
        .map_err(|invalid| HandlerError::business(format_args!("Invalid right {}!", invalid.0)))?;

    let sender_rights = ctx.rights.rights_of(&command.sender).unwrap_or(RightSet::EMPTY);
    if let Some(restricted) = changes
        .iter()
        .find(|right| right.is_restricted() && !sender_rights.contains(*right))
    {
        return Err(HandlerError::business(format_args!(
            "User does not own the {} right",
            restricted.code()
        )));
    }
    ctx.rights.authorize_modification(&command.sender, target, changes)?;
    Ok((target, changes))
}

/// `RADD,<phone>,<TAG TAG ...>`
fn right_add(ctx: &mut HandlerContext<'_>, command: &Command) -> Result<(), HandlerError> {
    let (target, changes) = rights_change(ctx, command)?;
    for right in changes.iter() {
        ctx.rights.grant(target, right)?;
    }
    info!("{} granted {} to {}", command.sender, changes, target);
    Ok(())
}

/// `RDEL,<phone>,<TAG TAG ...>`
fn right_del(ctx: &mut HandlerContext<'_>, command: &Command) -> Result<(), HandlerError> {
    let (target, changes) = rights_change(ctx, command)?;
    for right in changes.iter() {
        ctx.rights.revoke(target, right)?;
    }
    info!("{} revoked {} from {}", command.sender, changes, target);
    Ok(())
}

/// `PLIST[,filter]`
fn param_list(ctx: &mut HandlerContext<'_>, command: &Command) -> Result<(), HandlerError> {
    let filter = command.param1().unwrap_or("");
    let mut lines: Vec<Line, { crate::constants::MAX_PARAM_COUNT }> = Vec::new();
    for (key, value) in ctx.rights.params().iter() {
        if is_private(key) || !key.contains(filter) {
            continue;
        }
        let _ = lines.push(format_bounded(format_args!("{} = {}", key, value)));
    }
    reply_lines(ctx, command, lines.iter().map(|line| line.as_str()));
    Ok(())
}

/// `PSET,<name>,<value>`
fn param_set(ctx: &mut HandlerContext<'_>, command: &Command) -> Result<(), HandlerError> {
    let (Some(name), Some(value)) = (command.param1(), command.param2()) else {
        return Err(HandlerError::business(format_args!("2 parameters required!")));
    };
    let mut name: String<MAX_PARAM1_LENGTH> = format_bounded(format_args!("{}", name));
    name.make_ascii_lowercase();

    let Some(kind) = kind_of(&name) else {
        return Err(HandlerError::business(format_args!("Invalid {} parameter name", name)));
    };
    if is_private(&name) {
        return Err(HandlerError::business(format_args!("forbidden {} parameter name", name)));
    }
    match kind {
        ParamKind::Int if value.parse::<i32>().is_err() => {
            return Err(HandlerError::business(format_args!("integer value expected!")));
        }
        ParamKind::Text if !is_valid_text(value) => {
            return Err(HandlerError::business(format_args!("Valid text expected!")));
        }
        _ => {}
    }

    match ctx.rights.params_mut().set_from_text(&name, value) {
        Ok(()) => {
            info!("{} set {} = {}", command.sender, name, value);
            Ok(())
        }
        Err(ConfigError::InvalidValue) => Err(HandlerError::business(format_args!("Invalid {} value!", name))),
        Err(err) => Err(err.into()),
    }
}
