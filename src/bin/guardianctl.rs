fn main() -> anyhow::Result<()> {
    room_guardian::control::run()
}
