fn main() -> anyhow::Result<()> {
    groundstation_lib::run()
}
