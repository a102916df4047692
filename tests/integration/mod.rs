mod cli;
mod local_dispatch;
mod test_utils;
