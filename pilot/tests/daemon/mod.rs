mod add;
mod admin;
mod chain;
mod restore;
mod stop;
